//! Global atomic counters for deployment runs.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`] at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    deploys_confirmed: AtomicU64,
    patches_applied: AtomicU64,
    manifests_committed: AtomicU64,
    runs_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            deploys_confirmed: AtomicU64::new(0),
            patches_applied: AtomicU64::new(0),
            manifests_committed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_deploys(&self) {
        self.deploys_confirmed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deploys_confirmed", "counter incremented");
    }

    pub fn inc_patches(&self) {
        self.patches_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "patches_applied", "counter incremented");
    }

    pub fn inc_manifests(&self) {
        self.manifests_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "manifests_committed", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            deploys_confirmed = self.deploys_confirmed(),
            patches_applied = self.patches_applied(),
            manifests_committed = self.manifests_committed(),
            runs_failed = self.runs_failed(),
        );
    }

    pub fn deploys_confirmed(&self) -> u64 {
        self.deploys_confirmed.load(Ordering::Relaxed)
    }

    pub fn patches_applied(&self) -> u64 {
        self.patches_applied.load(Ordering::Relaxed)
    }

    pub fn manifests_committed(&self) -> u64 {
        self.manifests_committed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.deploys_confirmed.store(0, Ordering::Relaxed);
        self.patches_applied.store(0, Ordering::Relaxed);
        self.manifests_committed.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_reset() {
        let m = Metrics::new();
        m.inc_deploys();
        m.inc_deploys();
        m.inc_deploys();
        m.inc_patches();
        m.inc_manifests();
        assert_eq!(m.deploys_confirmed(), 3);
        assert_eq!(m.patches_applied(), 1);
        assert_eq!(m.manifests_committed(), 1);
        assert_eq!(m.runs_failed(), 0);

        m.inc_runs_failed();
        m.reset();
        assert_eq!(m.deploys_confirmed(), 0);
        assert_eq!(m.runs_failed(), 0);
    }
}
