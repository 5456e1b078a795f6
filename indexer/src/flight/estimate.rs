use std::time::{Duration, Instant};

/// Returns the time left for `total` batches when `completed` finished in `elapsed`.
///
/// The average batch duration is `elapsed / max(completed, 1)`. The result is zero once every
/// planned batch is complete.
pub fn estimate_remaining(elapsed: Duration, completed: u32, total: u32) -> Duration {
    if completed >= total {
        return Duration::ZERO;
    }

    let average = elapsed / completed.max(1);

    average
        .checked_mul(total - completed)
        .unwrap_or(Duration::MAX)
}

/// Tracks batch completion of one run and estimates its remaining time.
#[derive(Debug, Clone)]
pub struct TimeLeftEstimator {
    started_at: Instant,
    total_batches: u32,
    completed_batches: u32,
}

impl TimeLeftEstimator {
    pub fn new(total_batches: u32) -> Self {
        Self::starting_at(Instant::now(), total_batches)
    }

    pub fn starting_at(started_at: Instant, total_batches: u32) -> Self {
        Self {
            started_at,
            total_batches,
            completed_batches: 0,
        }
    }

    /// Adds batches discovered after the run started.
    pub fn add_planned_batches(&mut self, batches: u32) {
        self.total_batches = self.total_batches.saturating_add(batches);
    }

    /// Marks the zero-based batch `index` and every batch before it as complete.
    pub fn mark_batch_completed(&mut self, index: u32) {
        let completed = index.saturating_add(1).min(self.total_batches);
        self.completed_batches = self.completed_batches.max(completed);
    }

    pub fn total_batches(&self) -> u32 {
        self.total_batches
    }

    pub fn completed_batches(&self) -> u32 {
        self.completed_batches
    }

    pub fn estimate(&self) -> Duration {
        self.estimate_at(Instant::now())
    }

    pub fn estimate_at(&self, now: Instant) -> Duration {
        estimate_remaining(
            now.saturating_duration_since(self.started_at),
            self.completed_batches,
            self.total_batches,
        )
    }
}
