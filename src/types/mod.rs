//! Core value types: stamps, identities and job payloads.

pub mod id;
pub mod payload;
pub mod stamp;

pub use id::{ClusterName, CounterId, NodeId, RecordId};
pub use payload::{Failure, JobError, Payload};
pub use stamp::Stamp;
