//! Error types for resource acquisition, access, allocation and release.
//!
//! Acquisition-time errors are surfaced to the immediate caller. Release-time
//! failures are never surfaced: a [`ReleaseFailure`] only ever travels from a
//! release function to the configured [`ReleaseFailurePolicy`].
//!
//! [`ReleaseFailurePolicy`]: crate::config::ReleaseFailurePolicy

use std::error::Error as StdError;
use std::fmt;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A resource could not be obtained.
///
/// # Examples
///
/// ```rust
/// use holdfast::AcquisitionError;
///
/// let err = AcquisitionError::new("pool drained");
/// assert_eq!(err.to_string(), "acquisition failed: pool drained");
/// ```
#[derive(Debug)]
pub struct AcquisitionError {
    message: String,
    source: Option<BoxError>,
}

impl AcquisitionError {
    /// Create an acquisition error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Error used when a deep copy is requested but the wrapper was built
    /// without an acquisition function.
    pub fn unrepeatable(resource: &'static str) -> Self {
        Self::new(format!("no acquisition function bound for {}", resource))
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acquisition failed: {}", self.message)
    }
}

impl StdError for AcquisitionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for AcquisitionError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string()).with_source(err)
    }
}

impl From<String> for AcquisitionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&'static str> for AcquisitionError {
    fn from(message: &'static str) -> Self {
        Self::new(message)
    }
}

/// A wrapper was used while holding nothing.
///
/// This is a programmer error: it is surfaced immediately and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyResourceError {
    /// Type name of the resource the wrapper was declared to hold.
    pub resource: &'static str,
}

impl EmptyResourceError {
    /// Create the error for resource type `R`.
    pub fn of<R: ?Sized>() -> Self {
        Self {
            resource: std::any::type_name::<R>(),
        }
    }
}

impl fmt::Display for EmptyResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wrapper for {} holds no resource", self.resource)
    }
}

impl StdError for EmptyResourceError {}

/// Why an allocation retry loop stopped without producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionCause {
    /// No handler was installed when the allocation failed.
    NoHandler,
    /// The handler returned [`HandlerOutcome::GiveUp`](crate::retry::HandlerOutcome::GiveUp).
    HandlerGaveUp,
    /// The handler panicked; treated as giving up.
    HandlerPanicked,
}

impl fmt::Display for ExhaustionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionCause::NoHandler => write!(f, "no handler installed"),
            ExhaustionCause::HandlerGaveUp => write!(f, "handler gave up"),
            ExhaustionCause::HandlerPanicked => write!(f, "handler panicked"),
        }
    }
}

/// The allocation retry chain ran out of options.
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::RetryChain;
/// use holdfast::ExhaustionCause;
///
/// let chain = RetryChain::new();
/// let err = chain.allocate::<u64, _>(|| None).unwrap_err();
/// assert_eq!(err.cause, ExhaustionCause::NoHandler);
/// assert_eq!(err.attempts, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfResourceError {
    /// Type name of the allocation key.
    pub resource: &'static str,
    /// Number of calls made to the allocation primitive.
    pub attempts: u32,
    /// What ended the retry loop.
    pub cause: ExhaustionCause,
}

impl OutOfResourceError {
    /// Create a new OutOfResourceError.
    pub fn new(resource: &'static str, attempts: u32, cause: ExhaustionCause) -> Self {
        Self {
            resource,
            attempts,
            cause,
        }
    }
}

impl fmt::Display for OutOfResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of {} after {} attempts: {}",
            self.resource, self.attempts, self.cause
        )
    }
}

impl StdError for OutOfResourceError {}

/// A release function signalled failure.
///
/// Only ever handed to the configured failure policy; wrappers never return
/// it to their callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    /// Type name of the resource being released.
    pub resource: &'static str,
    /// Description reported by the release function, or the panic message.
    pub reason: String,
    /// True when the release function panicked rather than returning an error.
    pub panicked: bool,
}

impl ReleaseFailure {
    /// A release function returned an error.
    pub fn returned(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
            panicked: false,
        }
    }

    /// A release function panicked.
    pub fn panicked(resource: &'static str, payload: &(dyn std::any::Any + Send)) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            resource,
            reason,
            panicked: true,
        }
    }
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.panicked { "panicked" } else { "failed" };
        write!(f, "release of {} {}: {}", self.resource, verb, self.reason)
    }
}

impl StdError for ReleaseFailure {}

/// Umbrella error for operations that can fail in more than one way.
#[derive(Debug)]
pub enum ResourceError {
    /// The resource could not be acquired.
    Acquisition(AcquisitionError),
    /// The wrapper held nothing.
    Empty(EmptyResourceError),
    /// Bookkeeping memory could not be allocated.
    OutOfResource(OutOfResourceError),
}

impl ResourceError {
    /// Returns the acquisition error, if any.
    pub fn acquisition_error(&self) -> Option<&AcquisitionError> {
        match self {
            ResourceError::Acquisition(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the wrapper was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, ResourceError::Empty(_))
    }

    /// Returns true if allocation was exhausted.
    pub fn is_out_of_resource(&self) -> bool {
        matches!(self, ResourceError::OutOfResource(_))
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Acquisition(e) => write!(f, "{}", e),
            ResourceError::Empty(e) => write!(f, "{}", e),
            ResourceError::OutOfResource(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for ResourceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ResourceError::Acquisition(e) => Some(e),
            ResourceError::Empty(e) => Some(e),
            ResourceError::OutOfResource(e) => Some(e),
        }
    }
}

impl From<AcquisitionError> for ResourceError {
    fn from(err: AcquisitionError) -> Self {
        ResourceError::Acquisition(err)
    }
}

impl From<EmptyResourceError> for ResourceError {
    fn from(err: EmptyResourceError) -> Self {
        ResourceError::Empty(err)
    }
}

impl From<OutOfResourceError> for ResourceError {
    fn from(err: OutOfResourceError) -> Self {
        ResourceError::OutOfResource(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_error_keeps_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = AcquisitionError::from(io);
        assert!(err.to_string().contains("missing"));
        assert!(err.source().is_some());
    }

    #[test]
    fn acquisition_error_from_str_has_no_source() {
        let err = AcquisitionError::from("nope");
        assert_eq!(err.message(), "nope");
        assert!(err.source().is_none());
    }

    #[test]
    fn empty_error_names_type() {
        let err = EmptyResourceError::of::<u32>();
        assert_eq!(err.resource, "u32");
        assert_eq!(err.to_string(), "wrapper for u32 holds no resource");
    }

    #[test]
    fn out_of_resource_display() {
        let err = OutOfResourceError::new("Block", 3, ExhaustionCause::HandlerGaveUp);
        let display = err.to_string();
        assert!(display.contains("out of Block"));
        assert!(display.contains("3 attempts"));
        assert!(display.contains("handler gave up"));
    }

    #[test]
    fn release_failure_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let failure = ReleaseFailure::panicked("Fd", payload.as_ref());
        assert!(failure.panicked);
        assert_eq!(failure.reason, "boom");
        assert_eq!(failure.to_string(), "release of Fd panicked: boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(ReleaseFailure::panicked("Fd", payload.as_ref()).reason, "owned");
    }

    #[test]
    fn resource_error_conversions() {
        let err: ResourceError = EmptyResourceError::of::<u8>().into();
        assert!(err.is_empty());
        assert!(err.source().is_some());

        let err: ResourceError =
            OutOfResourceError::new("u8", 1, ExhaustionCause::NoHandler).into();
        assert!(err.is_out_of_resource());
        assert!(err.acquisition_error().is_none());

        let err: ResourceError = AcquisitionError::new("x").into();
        assert_eq!(err.acquisition_error().map(|e| e.message()), Some("x"));
    }
}
