//! Lock-free per-job invocation tally.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic invocation counter owned by a [`Job`](crate::Job).
///
/// Workers bump it once per completed runner call with relaxed ordering.
/// Readers only ever diff snapshots taken over intervals that are orders of
/// magnitude longer than a single increment, so no stronger ordering is
/// required. Wraparound is not defended against: sample windows are seconds
/// and rates stay far below 2^63 per second.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed runner invocation.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Shareable read-only view for the sampler.
    pub fn handle(&self) -> CounterHandle {
        CounterHandle(Arc::clone(&self.0))
    }
}

/// Read-only view of a [`Counter`].
#[derive(Debug, Clone)]
pub struct CounterHandle(Arc<AtomicU64>);

impl CounterHandle {
    /// Unsynchronized snapshot of the tally.
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
