//! Thread-safe run-state aggregation
//!
//! All workers report into this single structure; it is the only mutable
//! state shared across the run. Mutation happens under one mutex with
//! short critical sections.

use std::sync::{Mutex, PoisonError};

use catdiff_core::{HostResult, StatesCollection};

pub struct StateAggregator {
    inner: Mutex<StatesCollection>,
}

impl StateAggregator {
    /// Seed the aggregator with every host of the run; they all start in
    /// the not-yet-finished bucket.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(StatesCollection::with_hosts(hosts)),
        }
    }

    /// Record a finished host. Terminal outcomes are never overwritten.
    pub fn add(&self, result: &HostResult) {
        self.lock().add_result(result);
    }

    /// A point-in-time copy of the collection.
    pub fn snapshot(&self) -> StatesCollection {
        self.lock().clone()
    }

    pub fn summary(&self, partial: bool) -> String {
        self.lock().summary(partial)
    }

    pub fn run_failed(&self) -> bool {
        self.lock().run_failed()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatesCollection> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
