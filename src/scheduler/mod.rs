//! Scheduler data structures.
//!
//! - [`queue::JobQueue`]: jobs ready to run, spawned here or stolen
//! - [`stack::IrStack`]: jobs running on this node
//! - [`outstanding::IrVector`]: jobs stolen from this node
//! - [`victims::VictimTable`]: peers to steal from
//! - [`algorithm::LoadBalancer`]: whom to steal from next
//!
//! None of these lock anything. They live inside the runtime's single
//! scheduler state and every method expects that lock to be held. A record
//! sits in at most one of the queue, the stack and the outstanding list.

pub mod algorithm;
pub mod outstanding;
pub mod queue;
pub mod stack;
pub mod victims;

pub use algorithm::{AsyncSteal, ClientPlan, LoadBalancer, SyncSteal};
pub use outstanding::{AbortNotice, IrVector};
pub use queue::JobQueue;
pub use stack::IrStack;
pub use victims::VictimTable;
