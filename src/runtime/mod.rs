//! The Satin runtime: one node of a divide-and-conquer computation.
//!
//! - [`node`]: the [`Satin`] handle, root jobs, the worker loop, barrier and
//!   exit
//! - [`worker`]: what a running job sees ([`Worker`]): spawn, sync, inlets
//!   and aborts, plus the steal client
//! - `handler`: inbound messages and membership events
//! - `state`: the scheduler state every thread locks
//!
//! # Threads
//!
//! Each node has one worker thread (the caller of [`Satin::run_root`] or
//! [`Satin::run_worker`]). With upcall delivery a second thread receives
//! messages and applies them under the scheduler lock; with polling delivery
//! the worker drains the inbox itself at every spawn and sync. Blocking steal
//! requests park on short-lived helper threads until there is work.
//!
//! Job code never runs with the lock held. It is released around each
//! computation call and re-taken by every [`Worker`] operation.
//!
//! ```ignore
//! use satin::{ComputationRegistry, Payload, Satin, SatinConfig};
//!
//! let satin = Satin::new(SatinConfig::default(), transport, registry, computations)?;
//! if satin.is_master() {
//!     let result = satin.run_root("fib", Payload::encode(&30u64)?)?;
//! } else {
//!     satin.run_worker();
//! }
//! satin.exit();
//! ```

mod handler;
pub mod node;
pub(crate) mod state;
pub mod worker;

pub use node::{NodeStats, Satin, WorkerExit, MASTER_ROLE};
pub use state::ConsistencyViolation;
pub use worker::{JobHandle, SpawnCounter, Worker};
