//! Logging hooks shared by the wrappers and the allocation chain.
//!
//! Events go through `tracing` when the `tracing` feature is enabled and fall
//! back to stderr for warnings otherwise.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{self, ReleaseFailurePolicy};
use crate::error::{OutOfResourceError, ReleaseFailure};

static SWALLOWED_RELEASE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Number of release failures swallowed under [`ReleaseFailurePolicy::Log`]
/// since process start.
pub fn swallowed_release_failures() -> u64 {
    SWALLOWED_RELEASE_FAILURES.load(Ordering::Relaxed)
}

/// Apply the configured policy to a release failure. Never returns an error.
pub(crate) fn release_failed(failure: ReleaseFailure) {
    match config::current().release_failure {
        ReleaseFailurePolicy::Log => {
            SWALLOWED_RELEASE_FAILURES.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            tracing::warn!(
                resource = failure.resource,
                panicked = failure.panicked,
                "Resource release failed: {}",
                failure.reason
            );
            #[cfg(not(feature = "tracing"))]
            eprintln!("Resource release failed: {}", failure);
        }
        ReleaseFailurePolicy::Abort => {
            #[cfg(feature = "tracing")]
            tracing::error!(
                resource = failure.resource,
                "Resource release failed, aborting: {}",
                failure.reason
            );
            #[cfg(not(feature = "tracing"))]
            eprintln!("Resource release failed, aborting: {}", failure);
            std::process::abort();
        }
    }
}

pub(crate) fn allocation_failed(resource: &'static str, attempt: u32) {
    #[cfg(feature = "tracing")]
    tracing::debug!(resource, attempt, "Allocation failed, invoking handler");
    #[cfg(not(feature = "tracing"))]
    let _ = (resource, attempt);
}

pub(crate) fn allocation_exhausted(err: &OutOfResourceError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(
        resource = err.resource,
        attempts = err.attempts,
        "Allocation exhausted: {}",
        err.cause
    );
    #[cfg(not(feature = "tracing"))]
    eprintln!("Allocation exhausted: {}", err);
}

pub(crate) fn handler_terminated(resource: &'static str) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(resource, "Allocation handler requested termination");
    #[cfg(not(feature = "tracing"))]
    eprintln!("Allocation handler requested termination for {}", resource);
    std::process::abort()
}

pub(crate) fn handler_changed(action: &'static str, scope: &'static str, depth: usize) {
    #[cfg(feature = "tracing")]
    tracing::debug!(scope, depth, "Allocation handler {}", action);
    #[cfg(not(feature = "tracing"))]
    let _ = (action, scope, depth);
}
