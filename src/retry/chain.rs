//! The handler chain consulted when an allocation fails.

use std::any::TypeId;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::guard::HandlerGuard;
use crate::diagnostics;
use crate::error::{ExhaustionCause, OutOfResourceError};

/// An allocation failure handler.
///
/// Handlers run outside the chain's lock, so they may install, remove or
/// clear handlers themselves.
pub type Handler = Arc<dyn Fn() -> HandlerOutcome + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn() -> HandlerOutcome + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a handler tells the chain to do next.
pub enum HandlerOutcome {
    /// Capacity was (or may have been) freed; try the allocation again.
    Retry,
    /// Replace the invoking handler with this one, then try again.
    RetryWithNewHandler(Handler),
    /// Stop and report [`OutOfResourceError`].
    GiveUp,
    /// Abort the process.
    Terminate,
}

impl fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutcome::Retry => write!(f, "Retry"),
            HandlerOutcome::RetryWithNewHandler(_) => write!(f, "RetryWithNewHandler(<handler>)"),
            HandlerOutcome::GiveUp => write!(f, "GiveUp"),
            HandlerOutcome::Terminate => write!(f, "Terminate"),
        }
    }
}

/// Where a handler lives: the global stack or a per-type stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Global,
    Typed(TypeId),
}

impl Slot {
    fn label(&self) -> &'static str {
        match self {
            Slot::Global => "global",
            Slot::Typed(_) => "typed",
        }
    }
}

struct Entry {
    id: u64,
    handler: Handler,
}

struct Stacks {
    global: Vec<Entry>,
    typed: Vec<(TypeId, Vec<Entry>)>,
    next_id: u64,
}

impl Stacks {
    const fn new() -> Self {
        Self {
            global: Vec::new(),
            typed: Vec::new(),
            next_id: 0,
        }
    }

    fn stack(&self, slot: Slot) -> Option<&Vec<Entry>> {
        match slot {
            Slot::Global => Some(&self.global),
            Slot::Typed(id) => self
                .typed
                .iter()
                .find(|(key, _)| *key == id)
                .map(|(_, stack)| stack),
        }
    }

    fn stack_mut(&mut self, slot: Slot) -> Option<&mut Vec<Entry>> {
        match slot {
            Slot::Global => Some(&mut self.global),
            Slot::Typed(id) => self
                .typed
                .iter_mut()
                .find(|(key, _)| *key == id)
                .map(|(_, stack)| stack),
        }
    }

    fn stack_or_insert(&mut self, slot: Slot) -> &mut Vec<Entry> {
        let Slot::Typed(id) = slot else {
            return &mut self.global;
        };
        let pos = match self.typed.iter().position(|(key, _)| *key == id) {
            Some(pos) => pos,
            None => {
                self.typed.push((id, Vec::new()));
                self.typed.len() - 1
            }
        };
        &mut self.typed[pos].1
    }

    /// Drop a typed stack once its last handler is gone.
    fn prune(&mut self, slot: Slot) {
        if let Slot::Typed(id) = slot {
            self.typed.retain(|(key, stack)| *key != id || !stack.is_empty());
        }
    }

    fn top(&self, slot: Slot) -> Option<&Entry> {
        self.stack(slot).and_then(|stack| stack.last())
    }

    fn push(&mut self, slot: Slot, handler: Handler) -> (u64, Option<Handler>) {
        let id = self.next_id;
        self.next_id += 1;
        let stack = self.stack_or_insert(slot);
        let previous = stack.last().map(|e| e.handler.clone());
        stack.push(Entry { id, handler });
        (id, previous)
    }

    fn pop(&mut self, slot: Slot) -> Option<Handler> {
        let popped = self.stack_mut(slot)?.pop().map(|e| e.handler);
        self.prune(slot);
        popped
    }

    fn remove(&mut self, slot: Slot, id: u64) {
        if let Some(stack) = self.stack_mut(slot) {
            stack.retain(|e| e.id != id);
        }
        self.prune(slot);
    }

    /// Swap the handler of entry `id` in place, keeping its owner's guard
    /// valid. Returns false if the entry is gone.
    fn replace(&mut self, slot: Slot, id: u64, handler: Handler) -> bool {
        match self
            .stack_mut(slot)
            .and_then(|stack| stack.iter_mut().find(|e| e.id == id))
        {
            Some(entry) => {
                entry.handler = handler;
                true
            }
            None => false,
        }
    }

    /// Type-specific handlers take precedence over global ones.
    fn lookup(&self, key: TypeId) -> Option<(Slot, u64, Handler)> {
        let typed = Slot::Typed(key);
        self.top(typed)
            .map(|e| (typed, e.id, e.handler.clone()))
            .or_else(|| {
                self.top(Slot::Global)
                    .map(|e| (Slot::Global, e.id, e.handler.clone()))
            })
    }

    fn depth(&self, slot: Slot) -> usize {
        self.stack(slot).map_or(0, Vec::len)
    }
}

/// A stack of allocation failure handlers, global and per type.
///
/// Installation and lookup are serialized by a mutex that is held only for
/// the stack update, never while a handler runs. Most code uses the
/// process-wide chain from [`global`](super::global); separate chains are
/// useful for isolated subsystems and tests.
///
/// # Retry loop
///
/// [`allocate`](Self::allocate) calls the allocation primitive until it
/// succeeds, a handler gives up, or no handler is installed. The loop has no
/// built-in bound: a handler that keeps returning
/// [`HandlerOutcome::Retry`] without ever freeing capacity loops forever.
/// Handlers that must stop eventually count their own invocations (see
/// [`handlers::backoff`](super::handlers::backoff)).
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::{handler, HandlerOutcome, RetryChain};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let chain = RetryChain::new();
/// let freed = Arc::new(AtomicBool::new(false));
///
/// let f = freed.clone();
/// let _guard = chain.scoped(handler(move || {
///     f.store(true, Ordering::SeqCst);
///     HandlerOutcome::Retry
/// }));
///
/// let value = chain
///     .allocate::<u32, _>(|| freed.load(Ordering::SeqCst).then_some(7))
///     .unwrap();
/// assert_eq!(value, 7);
/// ```
pub struct RetryChain {
    stacks: Mutex<Stacks>,
}

impl RetryChain {
    /// An empty chain.
    pub const fn new() -> Self {
        Self {
            stacks: parking_lot::const_mutex(Stacks::new()),
        }
    }

    /// Push a global handler. Returns the handler it shadows.
    pub fn install(&self, handler: Handler) -> Option<Handler> {
        self.push(Slot::Global, handler).1
    }

    /// Push a handler for allocations keyed by `T`. Returns the handler it
    /// shadows in `T`'s stack.
    pub fn install_for<T: ?Sized + 'static>(&self, handler: Handler) -> Option<Handler> {
        self.push(Slot::Typed(TypeId::of::<T>()), handler).1
    }

    /// Push a global handler that is removed when the guard drops.
    pub fn scoped(&self, handler: Handler) -> HandlerGuard<'_> {
        let (id, previous) = self.push(Slot::Global, handler);
        HandlerGuard::new(self, Slot::Global, id, previous)
    }

    /// Push a handler for `T` that is removed when the guard drops.
    pub fn scoped_for<T: ?Sized + 'static>(&self, handler: Handler) -> HandlerGuard<'_> {
        let slot = Slot::Typed(TypeId::of::<T>());
        let (id, previous) = self.push(slot, handler);
        HandlerGuard::new(self, slot, id, previous)
    }

    /// Pop the most recent global handler.
    pub fn uninstall(&self) -> Option<Handler> {
        self.pop(Slot::Global)
    }

    /// Pop the most recent handler for `T`.
    pub fn uninstall_for<T: ?Sized + 'static>(&self) -> Option<Handler> {
        self.pop(Slot::Typed(TypeId::of::<T>()))
    }

    /// Remove every handler, global and typed.
    ///
    /// The next allocation failure fails immediately.
    pub fn clear(&self) {
        let mut stacks = self.stacks.lock();
        stacks.global.clear();
        stacks.typed.clear();
        diagnostics::handler_changed("cleared", "all", 0);
    }

    /// The current global handler.
    pub fn current(&self) -> Option<Handler> {
        self.stacks.lock().top(Slot::Global).map(|e| e.handler.clone())
    }

    /// The handler that would run for an allocation keyed by `T`.
    pub fn current_for<T: ?Sized + 'static>(&self) -> Option<Handler> {
        self.stacks
            .lock()
            .lookup(TypeId::of::<T>())
            .map(|(_, _, handler)| handler)
    }

    /// Number of installed global handlers.
    pub fn depth(&self) -> usize {
        self.stacks.lock().depth(Slot::Global)
    }

    /// Number of installed handlers for `T`, not counting global ones.
    pub fn depth_for<T: ?Sized + 'static>(&self) -> usize {
        self.stacks.lock().depth(Slot::Typed(TypeId::of::<T>()))
    }

    /// Allocate a `T`, consulting handlers keyed by `T` on failure.
    pub fn allocate<T: 'static, F>(&self, attempt: F) -> Result<T, OutOfResourceError>
    where
        F: FnMut() -> Option<T>,
    {
        self.allocate_keyed::<T, T, F>(attempt)
    }

    /// Allocate a value, consulting handlers keyed by `K` on failure.
    ///
    /// `attempt` is the allocation primitive: `None` means it failed.
    pub fn allocate_keyed<K, T, F>(&self, mut attempt: F) -> Result<T, OutOfResourceError>
    where
        K: ?Sized + 'static,
        F: FnMut() -> Option<T>,
    {
        let key = TypeId::of::<K>();
        let name = std::any::type_name::<K>();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if let Some(value) = attempt() {
                return Ok(value);
            }

            // Lookup holds the lock only long enough to clone the handler.
            let found = self.stacks.lock().lookup(key);
            let Some((slot, id, handler)) = found else {
                return Err(exhausted(name, attempts, ExhaustionCause::NoHandler));
            };

            diagnostics::allocation_failed(name, attempts);
            let outcome = match catch_unwind(AssertUnwindSafe(|| handler())) {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(exhausted(name, attempts, ExhaustionCause::HandlerPanicked))
                }
            };

            match outcome {
                HandlerOutcome::Retry => {}
                HandlerOutcome::RetryWithNewHandler(next) => {
                    // A handler that already removed itself leaves nothing
                    // to replace; the retry then consults what remains.
                    let mut stacks = self.stacks.lock();
                    if stacks.replace(slot, id, next) {
                        diagnostics::handler_changed("replaced", slot.label(), stacks.depth(slot));
                    }
                }
                HandlerOutcome::GiveUp => {
                    return Err(exhausted(name, attempts, ExhaustionCause::HandlerGaveUp))
                }
                HandlerOutcome::Terminate => diagnostics::handler_terminated(name),
            }
        }
    }

    fn push(&self, slot: Slot, handler: Handler) -> (u64, Option<Handler>) {
        let mut stacks = self.stacks.lock();
        let pushed = stacks.push(slot, handler);
        diagnostics::handler_changed("installed", slot.label(), stacks.depth(slot));
        pushed
    }

    fn pop(&self, slot: Slot) -> Option<Handler> {
        let mut stacks = self.stacks.lock();
        let popped = stacks.pop(slot);
        diagnostics::handler_changed("uninstalled", slot.label(), stacks.depth(slot));
        popped
    }

    pub(crate) fn remove(&self, slot: Slot, id: u64) {
        let mut stacks = self.stacks.lock();
        stacks.remove(slot, id);
        diagnostics::handler_changed("restored", slot.label(), stacks.depth(slot));
    }
}

fn exhausted(name: &'static str, attempts: u32, cause: ExhaustionCause) -> OutOfResourceError {
    let err = OutOfResourceError::new(name, attempts, cause);
    diagnostics::allocation_exhausted(&err);
    err
}

impl Default for RetryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stacks = self.stacks.lock();
        f.debug_struct("RetryChain")
            .field("global_depth", &stacks.global.len())
            .field("typed_stacks", &stacks.typed.len())
            .finish()
    }
}
