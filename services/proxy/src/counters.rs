//! Per-session debug tallies (in-memory only, logged at teardown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters a session's interceptors bump as traffic flows.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Responses seen by the response interceptor.
    pub responses: AtomicU64,
    /// Stack-trace responses that had frames filtered out.
    pub stack_traces_filtered: AtomicU64,
    /// Times the auto-step controller was invoked.
    pub auto_step_runs: AtomicU64,
    /// Individual step-over RPCs issued by the controller.
    pub auto_steps: AtomicU64,
    /// Responses dropped because their id fell in a reserved range.
    pub fabricated_dropped: AtomicU64,
}

/// A point-in-time copy of the counters, for the teardown summary log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub responses: u64,
    pub stack_traces_filtered: u64,
    pub auto_step_runs: u64,
    pub auto_steps: u64,
    pub fabricated_dropped: u64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            responses: self.responses.load(Ordering::Relaxed),
            stack_traces_filtered: self.stack_traces_filtered.load(Ordering::Relaxed),
            auto_step_runs: self.auto_step_runs.load(Ordering::Relaxed),
            auto_steps: self.auto_steps.load(Ordering::Relaxed),
            fabricated_dropped: self.fabricated_dropped.load(Ordering::Relaxed),
        }
    }
}
