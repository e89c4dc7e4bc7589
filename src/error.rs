// Error taxonomy for graph loading and scheduler operations

use crate::models::{state_machine::StatusTransitionError, IssueId};
use std::path::PathBuf;
use thiserror::Error;

/// Structural problems found while loading the dependency graph.
/// Always fatal: no usable graph is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphValidationError {
    #[error("Cycle detected: {}", join_path(.0))]
    CycleDetected(Vec<IssueId>),

    #[error("Batch cycle detected: {}", .0.join(" → "))]
    BatchCycle(Vec<String>),

    /// Issue dependencies and batch requirements together form a cycle, so
    /// none of the issues on the path can ever start
    #[error("Dependencies and batch requirements deadlock: {}", join_path(.0))]
    GatingCycle(Vec<IssueId>),

    #[error("Issue '{from}' {field} references non-existent issue '{to}'")]
    MissingReference {
        from: IssueId,
        field: &'static str,
        to: IssueId,
    },

    #[error("Batch '{batch}' requires non-existent batch '{required}'")]
    MissingBatch { batch: String, required: String },

    #[error("Batch '{batch}' lists non-existent issue '{item}'")]
    UnknownBatchItem { batch: String, item: IssueId },

    #[error("Issue '{0}' is defined more than once")]
    DuplicateItem(IssueId),

    #[error("Issue '{0}' does not belong to any batch")]
    ItemWithoutBatch(IssueId),

    #[error("Issue '{item}' is listed in both batch '{first}' and batch '{second}'")]
    DuplicateBatchMembership {
        item: IssueId,
        first: String,
        second: String,
    },

    #[error("Batch '{0}' has parallel_limit 0 (must be at least 1)")]
    InvalidParallelLimit(String),
}

fn join_path(path: &[IssueId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" → ")
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid dependency graph: {0}")]
    Graph(#[from] GraphValidationError),

    #[error("Dependency graph not found: {0:?}")]
    GraphNotFound(PathBuf),

    #[error("Failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Issue {0} not found in dependency graph")]
    IssueNotFound(IssueId),

    #[error("Batch {0} not found in dependency graph")]
    BatchNotFound(String),

    #[error("Issue {0} is not in progress")]
    IssueNotInProgress(IssueId),

    #[error(
        "Issue {0} is in progress without a claim token (written by an older tool) \
         and cannot be completed; reset its status to \"pending\" in the progress file and claim it again"
    )]
    MissingClaimToken(IssueId),

    #[error(
        "Issue {issue} has unsupported status \"{status}\" in {path:?}; \
         only pending, in_progress and complete are recognised, so edit the record before retrying"
    )]
    UnsupportedStatus {
        path: PathBuf,
        issue: String,
        status: String,
    },

    #[error("Claim token does not match the current claim on issue {0}")]
    InvalidClaimToken(IssueId),

    #[error("Unsupported conflict resolution strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Illegal status change: {0}")]
    Transition(#[from] StatusTransitionError),

    #[error("{0}")]
    Storage(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = GraphValidationError::CycleDetected(vec![
            IssueId::new("1"),
            IssueId::new("2"),
            IssueId::new("1"),
        ]);
        assert_eq!(err.to_string(), "Cycle detected: 1 → 2 → 1");
    }

    #[test]
    fn test_graph_error_converts() {
        let err: SchedulerError = GraphValidationError::ItemWithoutBatch(IssueId::new("9")).into();
        assert!(matches!(err, SchedulerError::Graph(_)));
        assert!(err.to_string().contains("does not belong to any batch"));
    }
}
