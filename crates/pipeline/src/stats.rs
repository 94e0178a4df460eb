//! Pipeline counters
//!
//! `acked` counts every delivery settled positively (skips included);
//! `nacked` every negative settlement. Each delivery contributes to exactly
//! one of the two.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub delivered: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub skipped: AtomicU64,
    pub processing_failures: AtomicU64,
    pub batches_flushed: AtomicU64,
}

impl PipelineCounters {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Final counters of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
    pub skipped: u64,
    pub processing_failures: u64,
    pub batches_flushed: u64,
}

impl PipelineStats {
    /// Deliveries settled either way.
    pub fn settled(&self) -> u64 {
        self.acked + self.nacked
    }
}
