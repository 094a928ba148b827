//! Scoped handler installation.

use std::fmt;

use super::chain::{Handler, RetryChain, Slot};

/// Removes the handler it installed when dropped.
///
/// Guards remove their own entry by identity, so guards dropped out of
/// installation order still leave every other handler in place. When guards
/// nest normally, dropping the inner one makes the outer handler current
/// again.
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::{handlers, RetryChain};
///
/// let chain = RetryChain::new();
/// chain.install(handlers::give_up());
/// {
///     let guard = chain.scoped(handlers::terminate());
///     assert!(guard.previous().is_some());
///     assert_eq!(chain.depth(), 2);
/// }
/// assert_eq!(chain.depth(), 1);
/// ```
#[must_use = "the handler is removed as soon as the guard is dropped"]
pub struct HandlerGuard<'a> {
    chain: &'a RetryChain,
    slot: Slot,
    id: u64,
    previous: Option<Handler>,
}

impl<'a> HandlerGuard<'a> {
    pub(crate) fn new(
        chain: &'a RetryChain,
        slot: Slot,
        id: u64,
        previous: Option<Handler>,
    ) -> Self {
        Self {
            chain,
            slot,
            id,
            previous,
        }
    }

    /// The handler that was current in the same stack before this one.
    pub fn previous(&self) -> Option<&Handler> {
        self.previous.as_ref()
    }
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.chain.remove(self.slot, self.id);
    }
}

impl fmt::Debug for HandlerGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerGuard")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}
