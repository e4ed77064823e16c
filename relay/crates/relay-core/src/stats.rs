//! Stats Module - Pipeline Counters
//!
//! Producer-side counters for one pipeline. The pipeline is only ever driven
//! by its owning worker thread, so the counters are plain integers; callers
//! read a copy through [`CommandPipeline::stats`](crate::pipeline::CommandPipeline::stats).

use std::ops::AddAssign;

use serde::Serialize;

/// Counters for one pipeline, or the sum over many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Records accepted
    pub recorded: u64,
    /// Records dropped because the context was invalid
    pub dropped: u64,
    /// Waiting -> reserve folds done by buffer swap
    pub swap_folds: u64,
    /// Waiting -> reserve folds done by appending
    pub append_folds: u64,
    /// Reserve -> active promotions that moved at least one record
    pub promotions: u64,
    /// Records moved into active by promotions
    pub promoted_records: u64,
    /// Batch-update requests sent to the host
    pub batch_requests: u64,
}

impl PipelineStats {
    /// Total folds of either kind
    pub fn folds(&self) -> u64 {
        self.swap_folds + self.append_folds
    }

    /// Share of folds that took the O(1) path, 0.0 - 1.0
    pub fn swap_ratio(&self) -> f64 {
        let folds = self.folds();
        if folds == 0 {
            return 0.0;
        }
        self.swap_folds as f64 / folds as f64
    }

    /// Average records per promotion
    pub fn mean_promotion_size(&self) -> f64 {
        if self.promotions == 0 {
            return 0.0;
        }
        self.promoted_records as f64 / self.promotions as f64
    }
}

impl AddAssign for PipelineStats {
    fn add_assign(&mut self, other: Self) {
        self.recorded += other.recorded;
        self.dropped += other.dropped;
        self.swap_folds += other.swap_folds;
        self.append_folds += other.append_folds;
        self.promotions += other.promotions;
        self.promoted_records += other.promoted_records;
        self.batch_requests += other.batch_requests;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_on_empty_stats() {
        let stats = PipelineStats::default();
        assert_eq!(stats.swap_ratio(), 0.0);
        assert_eq!(stats.mean_promotion_size(), 0.0);
    }

    #[test]
    fn test_accumulate() {
        let mut total = PipelineStats::default();
        total += PipelineStats {
            recorded: 10,
            swap_folds: 3,
            append_folds: 1,
            promotions: 2,
            promoted_records: 10,
            ..Default::default()
        };
        total += PipelineStats {
            recorded: 5,
            dropped: 2,
            ..Default::default()
        };

        assert_eq!(total.recorded, 15);
        assert_eq!(total.dropped, 2);
        assert_eq!(total.folds(), 4);
        assert_eq!(total.swap_ratio(), 0.75);
        assert_eq!(total.mean_promotion_size(), 5.0);
    }
}
