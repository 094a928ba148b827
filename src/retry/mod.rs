//! Allocation retry chain.
//!
//! When an allocation primitive fails, the chain asks the most recently
//! installed handler what to do. A handler can free capacity and ask for a
//! retry, replace itself with a different handler, give up, or terminate the
//! process:
//!
//! - **Retry**: call the allocation primitive again
//! - **RetryWithNewHandler**: swap the invoking handler, then retry
//! - **GiveUp**: return [`OutOfResourceError`](crate::OutOfResourceError)
//! - **Terminate**: abort
//!
//! Handlers form stacks. There is one global stack plus one stack per
//! allocation key type; a type's own handler takes precedence over the global
//! one. Scoped guards install a handler for the duration of a block and
//! restore the outer handler when they drop.
//!
//! # Quick Start
//!
//! ```rust
//! use holdfast::retry::{self, handlers};
//!
//! #[derive(Debug)]
//! struct Frame([u8; 64]);
//!
//! // Frames fail fast; everything else keeps the global behaviour.
//! let _guard = retry::global().scoped_for::<Frame>(handlers::give_up());
//!
//! let err = retry::global().allocate::<Frame, _>(|| None).unwrap_err();
//! assert_eq!(err.attempts, 1);
//! ```
//!
//! # Backoff
//!
//! [`BackoffPolicy`] describes a pause schedule; [`handlers::backoff`] turns
//! it into a handler that sleeps between retries. Enable the `jitter`
//! feature to randomize pauses:
//!
//! ```toml
//! holdfast = { version = "...", features = ["jitter"] }
//! ```

mod backoff;
mod chain;
mod guard;
pub mod handlers;

pub use backoff::{BackoffPolicy, Jitter, Schedule};
pub use chain::{handler, Handler, HandlerOutcome, RetryChain};
pub use guard::HandlerGuard;

static GLOBAL: RetryChain = RetryChain::new();

/// The process-wide chain used by [`SharedResource`](crate::SharedResource)
/// and [`memory::acquire_block`](crate::memory::acquire_block).
pub fn global() -> &'static RetryChain {
    &GLOBAL
}
