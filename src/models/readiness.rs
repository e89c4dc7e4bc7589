// Readiness results. Computed on every query, never persisted.

use super::{format_ids, IssueId, IssueStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an issue cannot start right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// Status is no longer pending
    AlreadyStarted { status: IssueStatus },
    /// Hard dependencies that are not complete
    MissingDeps { issues: Vec<IssueId> },
    /// Required batches that are not complete
    BatchPending { batches: Vec<String> },
    ParallelLimitReached { batch: String, limit: u32 },
    /// In-progress issues sharing a declared conflict or a file
    Conflict { issues: Vec<IssueId> },
    /// Another process changed the issue between the check and the claim
    RaceLost,
}

impl BlockReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::AlreadyStarted { .. } => "already_started",
            BlockReason::MissingDeps { .. } => "missing_deps",
            BlockReason::BatchPending { .. } => "batch_pending",
            BlockReason::ParallelLimitReached { .. } => "parallel_limit_reached",
            BlockReason::Conflict { .. } => "conflict",
            BlockReason::RaceLost => "race_lost",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::AlreadyStarted { status } => {
                write!(f, "already started or complete ({})", status)
            }
            BlockReason::MissingDeps { issues } => write!(f, "missing_deps: {}", format_ids(issues)),
            BlockReason::BatchPending { batches } => {
                write!(f, "batch_pending: [{}]", batches.join(", "))
            }
            BlockReason::ParallelLimitReached { batch, limit } => {
                write!(f, "parallel_limit_reached: batch {} (limit {})", batch, limit)
            }
            BlockReason::Conflict { issues } => write!(f, "conflict: {}", format_ids(issues)),
            BlockReason::RaceLost => write!(f, "race_lost"),
        }
    }
}

/// Result of asking whether an issue may start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    /// Startable; `warnings` lists incomplete soft dependencies
    Ready { warnings: Vec<IssueId> },
    Blocked { reasons: Vec<BlockReason> },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn reasons(&self) -> &[BlockReason] {
        match self {
            Readiness::Ready { .. } => &[],
            Readiness::Blocked { reasons } => reasons,
        }
    }

    pub fn reason_codes(&self) -> Vec<&'static str> {
        self.reasons().iter().map(|r| r.code()).collect()
    }

    /// One-line human-readable explanation of a blocked result
    pub fn describe(&self) -> String {
        match self {
            Readiness::Ready { warnings } if warnings.is_empty() => "ready".to_string(),
            Readiness::Ready { warnings } => {
                format!("ready (soft dependencies not complete: {})", format_ids(warnings))
            }
            Readiness::Blocked { reasons } => reasons
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}
