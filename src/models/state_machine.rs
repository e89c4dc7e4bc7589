// Issue status state machine: pending -> in_progress -> complete, nothing else

use super::IssueStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: IssueStatus, to: IssueStatus },

    #[error("Issue already complete")]
    AlreadyComplete,
}

/// Validates if an issue can move from one status to another. Only single
/// forward steps are allowed.
pub fn can_transition(from: IssueStatus, to: IssueStatus) -> bool {
    status_rank(to) == status_rank(from) + 1
}

/// Validates and performs a status transition
pub fn transition_status(
    current: IssueStatus,
    target: IssueStatus,
) -> Result<IssueStatus, StatusTransitionError> {
    if current == IssueStatus::Complete {
        return Err(StatusTransitionError::AlreadyComplete);
    }

    if !can_transition(current, target) {
        return Err(StatusTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Numeric position in the lifecycle
pub fn status_rank(status: IssueStatus) -> u8 {
    match status {
        IssueStatus::Pending => 0,
        IssueStatus::InProgress => 1,
        IssueStatus::Complete => 2,
    }
}
