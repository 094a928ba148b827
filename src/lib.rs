//! # Holdfast
//!
//! > *"What you acquire, you release. Exactly once."*
//!
//! A Rust library for owning external resources: memory blocks, file
//! descriptors, locks, connections.
//!
//! ## Philosophy
//!
//! A resource's lifetime is the lifetime of the value wrapping it:
//! - **Owned** = one owner, released when the owner drops ([`OwnedResource`])
//! - **Shared** = counted owners, released when the last one drops ([`SharedResource`])
//!
//! How a wrapper may be copied is part of its type ([`policy`]). Allocation
//! failures go through a pluggable handler chain ([`retry`]) instead of
//! failing outright. Release failures never escape a destructor; they are
//! handled by a policy fixed at configuration time ([`config`]).
//!
//! ## Quick Example
//!
//! ```rust
//! use holdfast::{AcquisitionError, OwnedResource, SharedResource};
//!
//! // A unique handle, closed when it goes out of scope.
//! let fd: OwnedResource<i32> = OwnedResource::acquire(
//!     || Ok::<_, AcquisitionError>(3),
//!     |fd: i32| println!("close({})", fd),
//! )
//! .unwrap();
//! assert_eq!(*fd.get().unwrap(), 3);
//!
//! // A connection shared by two owners, closed after both are gone.
//! let conn = SharedResource::from_raw("db-1".to_string(), |c: String| {
//!     println!("disconnect {}", c);
//! })
//! .unwrap();
//! let again = conn.clone();
//! assert_eq!(again.use_count(), 2);
//! ```
//!
//! ## Feature flags
//!
//! - `tracing` (default): emit events through [`tracing`](https://docs.rs/tracing);
//!   without it, warnings go to stderr
//! - `jitter`: randomized backoff pauses
//! - `serde`: `Serialize`/`Deserialize` for configuration types
//!
//! For a runnable example, see `demos/shared_log.rs`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod capability;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod memory;
pub mod owned;
pub mod policy;
pub mod release;
pub mod retry;
pub mod shared;
pub mod testing;

// Re-exports
pub use config::{Config, ReleaseFailurePolicy};
pub use error::{
    AcquisitionError, EmptyResourceError, ExhaustionCause, OutOfResourceError, ReleaseFailure,
    ResourceError,
};
pub use owned::{IntoSharedError, OwnedResource};
pub use policy::{
    CopyPolicy, DeepCopy, Duplicate, OwnedPolicy, Prohibited, RefCounted, ResourceWrapper,
    Transfer,
};
pub use release::{ReleaseOutcome, Releaser};
pub use retry::{Handler, HandlerGuard, HandlerOutcome, RetryChain};
pub use shared::SharedResource;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capability::{Categorized, Category};
    pub use crate::error::{AcquisitionError, EmptyResourceError, OutOfResourceError, ResourceError};
    pub use crate::owned::OwnedResource;
    pub use crate::policy::{DeepCopy, Duplicate, Prohibited, RefCounted, ResourceWrapper, Transfer};
    pub use crate::retry::{handler, HandlerOutcome, RetryChain};
    pub use crate::shared::SharedResource;
}
