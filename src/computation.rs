//! Spawnable computations.
//!
//! A job names its computation by string so that it can be shipped to a
//! thief and run there. Every node registers the same names before it
//! starts; the registry is consulted when a job is about to run.

use crate::runtime::Worker;
use crate::types::{JobError, Payload};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

/// The body of a spawnable job.
///
/// `run` may spawn further jobs through the worker and must sync them before
/// relying on their results. Returning `Err(JobError::Aborted)` after a sync
/// reported an abort is the expected way to unwind an aborted frame.
pub trait Computation: Send + Sync {
    /// Runs the job.
    fn run(&self, worker: &mut Worker<'_>, params: &Payload) -> Result<Payload, JobError>;
}

struct FnComputation<F>(F);

impl<F> Computation for FnComputation<F>
where
    F: Fn(&mut Worker<'_>, &Payload) -> Result<Payload, JobError> + Send + Sync,
{
    fn run(&self, worker: &mut Worker<'_>, params: &Payload) -> Result<Payload, JobError> {
        (self.0)(worker, params)
    }
}

/// Computations known to a node, by name.
#[derive(Clone, Default)]
pub struct ComputationRegistry {
    entries: HashMap<Arc<str>, Arc<dyn Computation>>,
}

impl ComputationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `computation` under `name`, replacing any earlier entry.
    pub fn register(&mut self, name: &str, computation: Arc<dyn Computation>) -> &mut Self {
        self.entries.insert(Arc::from(name), computation);
        self
    }

    /// Registers a closure.
    pub fn register_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Worker<'_>, &Payload) -> Result<Payload, JobError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnComputation(f)))
    }

    /// Looks up a computation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Computation>> {
        self.entries.get(name).cloned()
    }

    /// The interned name, if registered.
    #[must_use]
    pub fn name(&self, name: &str) -> Option<Arc<str>> {
        self.entries.get_key_value(name).map(|(k, _)| Arc::clone(k))
    }

    /// Number of registered computations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ComputationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(AsRef::as_ref).collect();
        names.sort_unstable();
        f.debug_struct("ComputationRegistry")
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn names_are_interned_and_replaced() {
        init_test_logging();
        crate::test_phase!("names_are_interned_and_replaced");
        let mut registry = ComputationRegistry::new();
        registry
            .register_fn("noop", |_, params| Ok(params.clone()))
            .register_fn("fail", |_, _| Err(JobError::Unavailable));
        assert_eq!(registry.len(), 2);
        let first = registry.name("noop").unwrap();
        registry.register_fn("noop", |_, _| Ok(Payload::default()));
        assert_eq!(registry.len(), 2);
        assert_eq!(&*registry.name("noop").unwrap(), &*first);
        assert!(registry.get("missing").is_none());
        assert_eq!(
            format!("{registry:?}"),
            "ComputationRegistry { names: [\"fail\", \"noop\"] }"
        );
        crate::test_complete!("names_are_interned_and_replaced");
    }
}
