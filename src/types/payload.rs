//! Values that cross the job boundary: parameters, return values and
//! application failures.

use crate::error::{Error, ErrorKind, Result};
use core::fmt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoded parameters or return value of a job.
///
/// The runtime treats payloads as opaque bytes. [`Payload::encode`] and
/// [`Payload::decode`] use JSON so computations can pass any serde type.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wraps raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encodes a value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|e| Error::new(ErrorKind::Codec).with_source(e))
    }

    /// Decodes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.0).map_err(|e| {
            Error::new(ErrorKind::Codec)
                .with_message(format!("payload of {} bytes", self.0.len()))
                .with_source(e)
        })
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if text.len() <= 64 => write!(f, "Payload({text})"),
            _ => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

/// An application failure raised by a job.
///
/// This is what travels in a JOB_RESULT_EXCEPTION message and what inlets
/// receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    message: String,
    panicked: bool,
}

impl Failure {
    /// A failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panicked: false,
        }
    }

    /// A failure produced by a panic inside a computation.
    #[must_use]
    pub fn from_panic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panicked: true,
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if the failure came from a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        self.panicked
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "panicked: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Outcome of a job as observed by its spawner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job raised a failure.
    #[error("job failed: {0}")]
    Failed(Failure),
    /// The job, or the frame observing it, was aborted.
    #[error("job aborted")]
    Aborted,
    /// The result is not available: not yet synced, or the handle outlived
    /// its frame.
    #[error("job result unavailable")]
    Unavailable,
}

impl From<Failure> for JobError {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

impl From<Error> for JobError {
    fn from(error: Error) -> Self {
        Self::Failed(Failure::new(error.to_string()))
    }
}
