// Shared value types for the scheduler

pub mod readiness;
pub mod state_machine;

pub use readiness::{BlockReason, Readiness};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier of a work item (one issue).
///
/// Graph files written by hand use bare integers (`id: 45`) as often as
/// strings (`id: "AUTH-1"`), so both deserialize to the same textual id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IssueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for IssueId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for IssueId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(IssueId(n.to_string())),
            RawId::Text(s) => Ok(IssueId(s)),
        }
    }
}

/// Render a list of ids as `[1, 2, 3]`
pub fn format_ids(ids: &[IssueId]) -> String {
    let joined: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
    format!("[{}]", joined.join(", "))
}

/// Persisted lifecycle status of a work item.
///
/// Readiness (`ready` / `blocked`) is never persisted; older progress files
/// that stored those values are read back as `pending`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    #[serde(alias = "ready", alias = "blocked")]
    Pending,
    InProgress,
    Complete,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Pending => "pending",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_id_from_number_and_string() {
        let ids: Vec<IssueId> = serde_yaml::from_str("[45, \"AUTH-1\", \"46\"]").unwrap();
        assert_eq!(ids[0], IssueId::new("45"));
        assert_eq!(ids[1], IssueId::new("AUTH-1"));
        // A quoted number and a bare number name the same item
        assert_eq!(IssueId::from(46u64), ids[2]);
    }

    #[test]
    fn test_issue_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&IssueId::new("7")).unwrap();
        assert_eq!(json, "\"7\"");
    }

    #[test]
    fn test_format_ids() {
        let ids = vec![IssueId::new("2"), IssueId::new("3")];
        assert_eq!(format_ids(&ids), "[2, 3]");
        assert_eq!(format_ids(&[]), "[]");
    }

    #[test]
    fn test_legacy_readiness_statuses_read_as_pending() {
        let ready: IssueStatus = serde_json::from_str("\"ready\"").unwrap();
        let blocked: IssueStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(ready, IssueStatus::Pending);
        assert_eq!(blocked, IssueStatus::Pending);

        let json = serde_json::to_string(&IssueStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result: Result<IssueStatus, _> = serde_json::from_str("\"failed\"");
        assert!(result.is_err());
    }
}
