//! Batch Manager - phase gating and progress aggregation
//!
//! Batch progress is always recomputed from the issue records of the current
//! snapshot; completion is never stored separately, so it cannot go stale.

use crate::error::SchedulerResult;
use crate::graph::{Batch, DependencyGraph};
use crate::models::IssueStatus;
use crate::progress::ProgressFile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgressSnapshot {
    pub batch_id: String,
    pub name: String,
    pub completed_count: usize,
    pub in_progress_count: usize,
    pub total_count: usize,
    pub parallel_limit: u32,
    pub is_complete: bool,
}

impl BatchProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }
        round_one_decimal(self.completed_count as f64 / self.total_count as f64 * 100.0)
    }
}

pub(crate) fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub struct BatchManager<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> BatchManager<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn batch_progress(
        &self,
        batch_id: &str,
        progress: &ProgressFile,
    ) -> SchedulerResult<BatchProgressSnapshot> {
        let batch = self.graph.batch(batch_id)?;
        Ok(snapshot(batch, progress))
    }

    /// True when every required batch is complete
    pub fn batch_ready(&self, batch_id: &str, progress: &ProgressFile) -> SchedulerResult<bool> {
        Ok(self.unmet_requirements(batch_id, progress)?.is_empty())
    }

    /// Required batches that still have incomplete issues
    pub fn unmet_requirements(
        &self,
        batch_id: &str,
        progress: &ProgressFile,
    ) -> SchedulerResult<Vec<String>> {
        let batch = self.graph.batch(batch_id)?;
        let mut unmet = Vec::new();
        for required in &batch.required_batches {
            if !snapshot(self.graph.batch(required)?, progress).is_complete {
                unmet.push(required.clone());
            }
        }
        Ok(unmet)
    }

    /// Issues of the batch currently in progress, checked against `parallel_limit`
    pub fn in_progress_count(
        &self,
        batch_id: &str,
        progress: &ProgressFile,
    ) -> SchedulerResult<usize> {
        let batch = self.graph.batch(batch_id)?;
        Ok(count_status(batch, progress, IssueStatus::InProgress))
    }

    /// Snapshots for every batch, ordered by batch id
    pub fn all_progress(&self, progress: &ProgressFile) -> Vec<BatchProgressSnapshot> {
        self.graph
            .batches()
            .map(|batch| snapshot(batch, progress))
            .collect()
    }
}

fn count_status(batch: &Batch, progress: &ProgressFile, status: IssueStatus) -> usize {
    batch
        .items
        .iter()
        .filter(|id| progress.status(id) == status)
        .count()
}

fn snapshot(batch: &Batch, progress: &ProgressFile) -> BatchProgressSnapshot {
    let completed_count = count_status(batch, progress, IssueStatus::Complete);
    BatchProgressSnapshot {
        batch_id: batch.id.clone(),
        name: batch.name.clone(),
        completed_count,
        in_progress_count: count_status(batch, progress, IssueStatus::InProgress),
        total_count: batch.items.len(),
        parallel_limit: batch.parallel_limit,
        is_complete: completed_count == batch.items.len(),
    }
}
