//! Small building blocks shared by the scheduler.

pub mod arena;
pub mod det_rng;

pub use arena::{Arena, ArenaIndex};
pub use det_rng::DetRng;
