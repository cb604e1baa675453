//! Satin: distributed divide-and-conquer with work stealing.
//!
//! # Overview
//!
//! A computation is a tree of jobs. A running job spawns children, keeps
//! going, and later syncs on them; spawned children wait in the node's job
//! queue until the node gets to them or an idle peer steals them. Every node
//! runs the same scheduler. One of them, the elected master, runs the root
//! job; the others steal and run whatever they find.
//!
//! # Core Guarantees
//!
//! - **Exactly-once settlement**: each spawned job decrements its spawn
//!   counter exactly once, whether it finishes, fails, is aborted or is lost
//! - **Speculative aborts**: a failure that escapes a job is offered to an
//!   inlet at the spawn site; if nobody absorbs it, the spawning frame and
//!   all of its other descendants are aborted, on whatever node they run
//! - **Crash recovery**: jobs lost with a crashed node are redone; finished
//!   subtrees are recovered from a global result table instead of recomputed
//! - **Master takeover**: when the master crashes a new one is elected and
//!   replays the root job against the result table
//!
//! # Module Structure
//!
//! - [`types`]: stamps, node and record identities, payloads and failures
//! - [`record`]: invocation records and the table that owns them
//! - [`scheduler`]: job queue, running stack, outstanding list, victims,
//!   load balancing
//! - [`ft`]: crash recovery and the global result table
//! - [`protocol`]: wire messages
//! - [`transport`]: the network seam and an in-process implementation
//! - [`runtime`]: the [`Satin`] node and the [`Worker`] seen by job code
//! - [`computation`]: named, shippable job bodies
//! - [`config`]: runtime configuration and environment overrides
//! - [`error`]: error types
//! - [`util`]: arena and deterministic RNG

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

mod aborts;
pub mod computation;
pub mod config;
pub mod error;
pub mod ft;
pub mod protocol;
pub mod record;
pub mod runtime;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_utils;

// Re-exports for convenient access to core types
pub use computation::{Computation, ComputationRegistry};
pub use config::{
    Algorithm, Delivery, FaultTolerance, SatinConfig, SatinConfigBuilder, TableKeyScheme,
    TableMode, ViolationResponse,
};
pub use error::{
    Error, ErrorCategory, ErrorKind, Recoverability, RecoveryAction, Result, ResultExt,
};
pub use ft::table::{GlobalResultTable, TableKey, TableValue};
pub use protocol::{JobOutcome, Message, Opcode, StealKind};
pub use runtime::{
    ConsistencyViolation, JobHandle, NodeStats, Satin, SpawnCounter, Worker, WorkerExit,
    MASTER_ROLE,
};
pub use transport::{Inbound, LocalNetwork, LocalTransport, Registry, Transport};
pub use types::{ClusterName, Failure, JobError, NodeId, Payload, Stamp};
