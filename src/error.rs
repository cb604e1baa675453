//! Error types and the error handling strategy of the runtime.
//!
//! Errors fall into four groups, mirroring how the runtime reacts to them:
//!
//! - **Application**: a failure escaped every inlet up to the spawn-tree
//!   root. Failures below the root never surface here; they travel through
//!   the inlet protocol as [`Failure`](crate::types::Failure) values.
//! - **Transport**: a send to one peer failed. With fault tolerance enabled
//!   the peer is treated as a crash suspect; otherwise the operation that
//!   needed the send is abandoned and the failure is logged.
//! - **Consistency**: the scheduler's locked invariants were broken (spawn
//!   counter below zero, a record decremented twice, an opcode nobody
//!   knows). These are never returned to callers; they go through the
//!   fail-fast path configured by
//!   [`ViolationResponse`](crate::config::ViolationResponse).
//! - **Lifecycle**: configuration, election and shutdown conditions.
//!
//! # Recovery Classification
//!
//! Every kind reports a [`Recoverability`] and a [`RecoveryAction`] so that
//! embedders can decide whether to retry a root computation.

use core::fmt;
use std::sync::Arc;

use crate::types::{NodeId, Stamp};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Application ===
    /// A job failure was not absorbed by any inlet up to the root.
    Unhandled,

    // === Transport ===
    /// The channel to a peer is gone.
    ConnectionLost,
    /// The peer is not (or no longer) a member of the computation.
    NodeUnavailable,
    /// A message was well-formed but unexpected in the current state.
    ProtocolError,
    /// A message carried an opcode this runtime does not know.
    UnknownOpcode,
    /// Encoding or decoding a payload or message failed.
    Codec,

    // === Consistency ===
    /// A spawn counter would have gone below zero.
    CounterUnderflow,
    /// A record tried to decrement its spawn counter a second time.
    DoubleDecrement,
    /// Scheduler bookkeeping disagrees with itself.
    InvalidState,

    // === Lifecycle ===
    /// The registry could not elect a master.
    ElectionFailed,
    /// Invalid configuration.
    Config,
    /// The node is shutting down.
    Exiting,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Unhandled => ErrorCategory::Application,
            Self::ConnectionLost
            | Self::NodeUnavailable
            | Self::ProtocolError
            | Self::UnknownOpcode
            | Self::Codec => ErrorCategory::Transport,
            Self::CounterUnderflow | Self::DoubleDecrement | Self::InvalidState => {
                ErrorCategory::Consistency
            }
            Self::ElectionFailed | Self::Config | Self::Exiting => ErrorCategory::Lifecycle,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::ConnectionLost | Self::NodeUnavailable | Self::ElectionFailed => {
                Recoverability::Transient
            }
            Self::ProtocolError
            | Self::UnknownOpcode
            | Self::Codec
            | Self::CounterUnderflow
            | Self::DoubleDecrement
            | Self::InvalidState
            | Self::Config
            | Self::Exiting => Recoverability::Permanent,
            Self::Unhandled => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    /// Returns the recommended recovery action for this error kind.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::ElectionFailed => RecoveryAction::RetryWithBackoff,
            Self::ConnectionLost | Self::NodeUnavailable => RecoveryAction::TreatAsCrash,
            Self::CounterUnderflow
            | Self::DoubleDecrement
            | Self::InvalidState
            | Self::UnknownOpcode => RecoveryAction::FailFast,
            Self::Unhandled
            | Self::ProtocolError
            | Self::Codec
            | Self::Config
            | Self::Exiting => RecoveryAction::Propagate,
        }
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Depends on the application.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Recommended reaction to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Retry after a delay.
    RetryWithBackoff,
    /// Hand the peer to crash handling when fault tolerance is on.
    TreatAsCrash,
    /// Return the error to the caller.
    Propagate,
    /// Dump scheduler state and stop the node.
    FailFast,
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Failures raised by computations.
    Application,
    /// Peer communication failures.
    Transport,
    /// Broken scheduler invariants.
    Consistency,
    /// Configuration, election and shutdown.
    Lifecycle,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The peer involved, if any.
    pub node: Option<NodeId>,
    /// The job involved, if any.
    pub stamp: Option<Stamp>,
}

/// The main error type of the runtime.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                node: None,
                stamp: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Names the peer involved.
    #[must_use]
    pub fn with_node(mut self, node: &NodeId) -> Self {
        self.context.node = Some(node.clone());
        self
    }

    /// Names the job involved.
    #[must_use]
    pub fn with_stamp(mut self, stamp: &Stamp) -> Self {
        self.context.stamp = Some(stamp.clone());
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns the recommended recovery action for this error.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        self.kind.recovery_action()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns true for transport failures.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Transport)
    }

    /// Returns true for broken scheduler invariants.
    #[must_use]
    pub const fn is_consistency_violation(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Consistency)
    }

    /// A send to `node` failed because the channel is gone.
    #[must_use]
    pub fn connection_lost(node: &NodeId) -> Self {
        Self::new(ErrorKind::ConnectionLost)
            .with_message(format!("connection to {node} lost"))
            .with_node(node)
    }

    /// `node` is not a member of the computation.
    #[must_use]
    pub fn node_unavailable(node: &NodeId) -> Self {
        Self::new(ErrorKind::NodeUnavailable)
            .with_message(format!("node unavailable: {node}"))
            .with_node(node)
    }

    /// A failure reached the spawn-tree root.
    #[must_use]
    pub fn unhandled(failure: &crate::types::Failure) -> Self {
        Self::new(ErrorKind::Unhandled).with_message(format!("spawned job failed: {failure}"))
    }

    /// Invalid configuration value.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach a context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for runtime operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_with_and_without_message() {
        assert_eq!(Error::new(ErrorKind::Exiting).to_string(), "Exiting");
        let err = Error::new(ErrorKind::Config).with_message("queue_size_hint");
        assert_eq!(err.to_string(), "Config: queue_size_hint");
    }

    #[test]
    fn source_chain_is_preserved() {
        let err = Error::new(ErrorKind::Codec).with_source(Underlying);
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("underlying"));
    }

    #[test]
    fn consistency_kinds_fail_fast() {
        for kind in [
            ErrorKind::CounterUnderflow,
            ErrorKind::DoubleDecrement,
            ErrorKind::InvalidState,
        ] {
            let err = Error::new(kind);
            assert!(err.is_consistency_violation());
            assert_eq!(err.recovery_action(), RecoveryAction::FailFast);
            assert!(err.recoverability() == Recoverability::Permanent);
        }
        assert_eq!(
            ErrorKind::UnknownOpcode.recovery_action(),
            RecoveryAction::FailFast
        );
    }

    #[test]
    fn transport_errors_point_at_crash_handling() {
        let node = NodeId::new("peer");
        let err = Error::connection_lost(&node);
        assert!(err.is_transport_error());
        assert!(err.kind().is_retryable());
        assert_eq!(err.recovery_action(), RecoveryAction::TreatAsCrash);
        assert_eq!(err.context().node.as_ref(), Some(&node));
    }

    #[test]
    fn result_ext_attaches_message() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::ProtocolError));
        let err = res.context("steal reply from unknown victim").unwrap_err();
        assert_eq!(err.message(), Some("steal reply from unknown victim"));
    }
}
