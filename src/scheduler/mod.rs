//! Scheduler Facade - readiness checks, claims, and completion
//!
//! Per-issue states are `Pending/Blocked`, `Pending/Ready`, `InProgress` and
//! `Complete`. Only the status is stored; Blocked vs Ready is recomputed on
//! every query because a dependency completing, a conflict clearing or a
//! parallel slot freeing can change it between two reads. Completion unlocks
//! downstream issues simply because the next query sees fresh state.

use crate::batches::{round_one_decimal, BatchManager, BatchProgressSnapshot};
use crate::config::SchedulerConfig;
use crate::conflicts::{Conflict, ConflictDetector, ConflictResolution, ResolutionStrategy};
use crate::error::SchedulerResult;
use crate::graph::{DependencyGraph, WorkItem};
use crate::models::{BlockReason, IssueId, IssueStatus, Readiness};
use crate::progress::{ClaimAttempt, ClaimToken, ProgressFile, ProgressRecord, ProgressStore};
use serde::{Deserialize, Serialize};

/// Result of [`Scheduler::claim`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed {
        token: ClaimToken,
        /// Incomplete soft dependencies
        warnings: Vec<IssueId>,
    },
    Blocked {
        reasons: Vec<BlockReason>,
    },
}

impl ClaimOutcome {
    pub fn token(&self) -> Option<&ClaimToken> {
        match self {
            ClaimOutcome::Claimed { token, .. } => Some(token),
            ClaimOutcome::Blocked { .. } => None,
        }
    }
}

/// What changed after an issue was marked complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub issue_id: IssueId,
    pub record: ProgressRecord,
    pub batch: BatchProgressSnapshot,
    /// Issues that were not startable before this completion and are now
    pub newly_ready: Vec<IssueId>,
    /// Batches whose requirements became satisfied by this completion
    pub unlocked_batches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIssue {
    pub issue_id: IssueId,
    pub batch: String,
    pub reasons: Vec<BlockReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Complete,
    /// Required batches are done; issues may start
    Ready,
    /// Waiting on required batches
    Waiting,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Complete => "complete",
            BatchStatus::Ready => "ready",
            BatchStatus::Waiting => "waiting",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub id: String,
    pub name: String,
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
    pub parallel_limit: u32,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub project: String,
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
    /// `total - complete - in_progress`
    pub pending: usize,
    /// Pending issues that cannot start right now
    pub blocked: usize,
    pub completion_percentage: f64,
    pub per_batch: Vec<BatchSummary>,
}

pub struct Scheduler {
    graph: DependencyGraph,
    store: ProgressStore,
}

impl Scheduler {
    pub fn new(graph: DependencyGraph, store: ProgressStore) -> Self {
        Self { graph, store }
    }

    /// Load the graph named by `config` and attach its progress store
    pub fn open(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let graph = DependencyGraph::load(&config.graph_path, config.default_parallel_limit)?;
        let store = ProgressStore::new(&config.progress_path);
        Ok(Self::new(graph, store))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Fresh unlocked read of the progress file
    pub fn snapshot(&self) -> SchedulerResult<ProgressFile> {
        self.store.load(&self.graph)
    }

    /// Readiness of `id` against a given snapshot
    pub fn evaluate(&self, id: &IssueId, progress: &ProgressFile) -> SchedulerResult<Readiness> {
        let item = self.graph.item(id)?;

        let status = progress.status(id);
        if status != IssueStatus::Pending {
            return Ok(Readiness::Blocked {
                reasons: vec![BlockReason::AlreadyStarted { status }],
            });
        }

        let reasons = self.gating_reasons(item, progress)?;
        if !reasons.is_empty() {
            return Ok(Readiness::Blocked { reasons });
        }

        let warnings = item
            .soft_depends_on
            .iter()
            .filter(|dep| !progress.is_complete(dep))
            .cloned()
            .collect();
        Ok(Readiness::Ready { warnings })
    }

    /// Dependency, batch, capacity and conflict checks, in that order
    fn gating_reasons(
        &self,
        item: &WorkItem,
        progress: &ProgressFile,
    ) -> SchedulerResult<Vec<BlockReason>> {
        let mut reasons = Vec::new();

        let missing: Vec<IssueId> = item
            .depends_on
            .iter()
            .filter(|dep| !progress.is_complete(dep))
            .cloned()
            .collect();
        if !missing.is_empty() {
            reasons.push(BlockReason::MissingDeps { issues: missing });
        }

        let batches = BatchManager::new(&self.graph);
        let unmet = batches.unmet_requirements(&item.batch_id, progress)?;
        if !unmet.is_empty() {
            reasons.push(BlockReason::BatchPending { batches: unmet });
        }

        let batch = self.graph.batch(&item.batch_id)?;
        if batches.in_progress_count(&batch.id, progress)? >= batch.parallel_limit as usize {
            reasons.push(BlockReason::ParallelLimitReached {
                batch: batch.id.clone(),
                limit: batch.parallel_limit,
            });
        }

        let conflicts = ConflictDetector::new(&self.graph).blocking_conflicts(&item.id, progress)?;
        if !conflicts.is_empty() {
            reasons.push(BlockReason::Conflict { issues: conflicts });
        }

        Ok(reasons)
    }

    /// Whether `id` may start right now
    pub fn can_start(&self, id: &IssueId) -> SchedulerResult<Readiness> {
        let progress = self.snapshot()?;
        self.evaluate(id, &progress)
    }

    /// Check readiness, then atomically claim. Every check is repeated under
    /// the store lock against freshly read state; if that state changed in a
    /// way that forbids the claim the result is `Blocked` with `race_lost`.
    pub fn claim(&self, id: &IssueId) -> SchedulerResult<ClaimOutcome> {
        let snapshot = self.snapshot()?;
        let warnings = match self.evaluate(id, &snapshot)? {
            Readiness::Ready { warnings } => warnings,
            Readiness::Blocked { reasons } => return Ok(ClaimOutcome::Blocked { reasons }),
        };

        let item = self.graph.item(id)?;
        let attempt = self.store.try_claim(&self.graph, id, Some(snapshot.revision), |fresh| {
            self.gating_reasons(item, fresh)
        })?;

        Ok(match attempt {
            ClaimAttempt::Claimed(token) => ClaimOutcome::Claimed { token, warnings },
            ClaimAttempt::AlreadyClaimed(_) => ClaimOutcome::Blocked {
                reasons: vec![BlockReason::RaceLost],
            },
            ClaimAttempt::Rejected(fresh_reasons) => {
                log::info!(
                    "[Scheduler] Claim of issue {} lost a race: {}",
                    id,
                    Readiness::Blocked {
                        reasons: fresh_reasons.clone()
                    }
                    .describe()
                );
                let mut reasons = vec![BlockReason::RaceLost];
                reasons.extend(fresh_reasons);
                ClaimOutcome::Blocked { reasons }
            }
        })
    }

    /// Record completion of a claimed issue and report what it unlocked
    pub fn mark_complete(
        &self,
        id: &IssueId,
        token: &ClaimToken,
        result_ref: Option<&str>,
    ) -> SchedulerResult<CompletionReport> {
        let batch_id = self.graph.batch_of(id)?.to_string();
        let before = self.snapshot()?;
        let ready_before = self.ready_in(None, &before)?;
        let batches = BatchManager::new(&self.graph);
        let mut waiting_before = Vec::new();
        for batch in self.graph.batches() {
            if !batches.batch_ready(&batch.id, &before)? {
                waiting_before.push(batch.id.clone());
            }
        }

        let record = self.store.mark_complete(&self.graph, id, token, result_ref)?;

        let after = self.snapshot()?;
        let batch = batches.batch_progress(&batch_id, &after)?;
        let newly_ready = self
            .ready_in(None, &after)?
            .into_iter()
            .filter(|ready| !ready_before.contains(ready))
            .collect();

        let mut unlocked_batches = Vec::new();
        for waiting in waiting_before {
            if batches.batch_ready(&waiting, &after)? {
                unlocked_batches.push(waiting);
            }
        }

        if batch.is_complete {
            log::info!(
                "[Scheduler] Batch {} ({}) complete: {} issues finished",
                batch.batch_id,
                batch.name,
                batch.total_count
            );
        }
        for unlocked in &unlocked_batches {
            log::info!("[Scheduler] Batch {} is now ready", unlocked);
        }

        Ok(CompletionReport {
            issue_id: id.clone(),
            record,
            batch,
            newly_ready,
            unlocked_batches,
        })
    }

    /// Pending issues that may start now, optionally scoped to one batch
    pub fn get_ready_issues(&self, batch_id: Option<&str>) -> SchedulerResult<Vec<IssueId>> {
        let progress = self.snapshot()?;
        self.ready_in(batch_id, &progress)
    }

    fn ready_in(
        &self,
        batch_id: Option<&str>,
        progress: &ProgressFile,
    ) -> SchedulerResult<Vec<IssueId>> {
        let candidates: Vec<&IssueId> = match batch_id {
            Some(batch_id) => self.graph.batch(batch_id)?.items.iter().collect(),
            None => self.graph.items().iter().map(|item| &item.id).collect(),
        };

        let mut ready = Vec::new();
        for id in candidates {
            if progress.status(id) != IssueStatus::Pending {
                continue;
            }
            if self.evaluate(id, progress)?.is_ready() {
                ready.push(id.clone());
            }
        }
        Ok(ready)
    }

    /// Pending issues that cannot start, with the reasons
    pub fn get_blocked_issues(&self) -> SchedulerResult<Vec<BlockedIssue>> {
        let progress = self.snapshot()?;
        self.blocked_in(&progress)
    }

    fn blocked_in(&self, progress: &ProgressFile) -> SchedulerResult<Vec<BlockedIssue>> {
        let mut blocked = Vec::new();
        for item in self.graph.items() {
            if progress.status(&item.id) != IssueStatus::Pending {
                continue;
            }
            if let Readiness::Blocked { reasons } = self.evaluate(&item.id, progress)? {
                blocked.push(BlockedIssue {
                    issue_id: item.id.clone(),
                    batch: item.batch_id.clone(),
                    reasons,
                });
            }
        }
        Ok(blocked)
    }

    pub fn get_progress_summary(&self) -> SchedulerResult<ProgressSummary> {
        let progress = self.snapshot()?;
        let items = self.graph.items();

        let total = items.len();
        let complete = items.iter().filter(|i| progress.is_complete(&i.id)).count();
        let in_progress = items.iter().filter(|i| progress.is_in_progress(&i.id)).count();
        let blocked = self.blocked_in(&progress)?.len();

        let batches = BatchManager::new(&self.graph);
        let mut per_batch = Vec::new();
        for snap in batches.all_progress(&progress) {
            let status = if snap.is_complete {
                BatchStatus::Complete
            } else if batches.batch_ready(&snap.batch_id, &progress)? {
                BatchStatus::Ready
            } else {
                BatchStatus::Waiting
            };
            per_batch.push(BatchSummary {
                id: snap.batch_id,
                name: snap.name,
                total: snap.total_count,
                complete: snap.completed_count,
                in_progress: snap.in_progress_count,
                parallel_limit: snap.parallel_limit,
                status,
            });
        }

        let completion_percentage = if total == 0 {
            0.0
        } else {
            round_one_decimal(complete as f64 / total as f64 * 100.0)
        };

        Ok(ProgressSummary {
            project: self.graph.project().to_string(),
            total,
            complete,
            in_progress,
            pending: total - complete - in_progress,
            blocked,
            completion_percentage,
            per_batch,
        })
    }

    /// Conflicts between `id` and issues currently in progress
    pub fn detect_conflicts(&self, id: &IssueId) -> SchedulerResult<Vec<Conflict>> {
        let progress = self.snapshot()?;
        ConflictDetector::new(&self.graph).detect_conflicts(id, &progress)
    }

    pub fn resolve_conflict(
        &self,
        strategy: ResolutionStrategy,
        ids: &[IssueId],
    ) -> SchedulerResult<ConflictResolution> {
        ConflictDetector::new(&self.graph).resolve_conflict(strategy, ids)
    }
}

#[cfg(test)]
mod tests;
