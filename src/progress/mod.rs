//! Progress Store - durable, process-shared progress records
//!
//! `progress.json` holds one record per issue. Many short-lived processes
//! read and write it concurrently, so every mutation follows the same
//! discipline:
//!
//! 1. acquire the exclusive lock (`progress.json.lock`)
//! 2. reload the file from disk (never trust a snapshot from an earlier call)
//! 3. re-validate and mutate
//! 4. commit with temp file + atomic rename, bumping `revision`
//! 5. release the lock
//!
//! Read-only accessors skip the lock and may see a slightly stale snapshot;
//! anything they decide is re-checked inside the locked path of a claim.
//!
//! File location: `.scheduler/progress.json`

use crate::error::{SchedulerError, SchedulerResult};
use crate::file_storage::{read_json, write_json, LockGuard};
use crate::graph::DependencyGraph;
use crate::models::state_machine::transition_status;
use crate::models::{BlockReason, IssueId, IssueStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque proof of ownership of an in-progress claim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(String);

impl ClaimToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClaimToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persisted progress of a single issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Merge reference, e.g. a pull request URL
    #[serde(default, alias = "pr_url")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<ClaimToken>,
}

/// The complete progress file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressFile {
    #[serde(default)]
    pub project: String,
    /// Incremented by every committed mutation
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub issues: BTreeMap<IssueId, ProgressRecord>,
}

impl ProgressFile {
    /// Empty progress for a project that has never been written
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            revision: 0,
            created_at: None,
            updated_at: None,
            issues: BTreeMap::new(),
        }
    }

    /// Add a pending record for every graph item that has none
    pub fn fill_missing(&mut self, graph: &DependencyGraph) -> usize {
        let mut added = 0;
        for item in graph.items() {
            if !self.issues.contains_key(&item.id) {
                self.issues.insert(item.id.clone(), ProgressRecord::default());
                added += 1;
            }
        }
        added
    }

    /// Record for an issue; absent records read as pending
    pub fn record(&self, id: &IssueId) -> ProgressRecord {
        self.issues.get(id).cloned().unwrap_or_default()
    }

    pub fn status(&self, id: &IssueId) -> IssueStatus {
        self.issues.get(id).map(|r| r.status).unwrap_or_default()
    }

    pub fn is_complete(&self, id: &IssueId) -> bool {
        self.status(id) == IssueStatus::Complete
    }

    pub fn is_in_progress(&self, id: &IssueId) -> bool {
        self.status(id) == IssueStatus::InProgress
    }

    /// Issue ids currently holding a claim
    pub fn in_progress_ids(&self) -> Vec<IssueId> {
        self.issues
            .iter()
            .filter(|(_, r)| r.status == IssueStatus::InProgress)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Outcome of [`ProgressStore::try_claim`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    /// The issue is now in progress and owned by this token
    Claimed(ClaimToken),
    /// Someone else moved the issue out of pending first
    AlreadyClaimed(IssueStatus),
    /// Fresh state no longer allows the claim
    Rejected(Vec<BlockReason>),
}

/// Progress store for file I/O under the exclusive lock
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read current on-disk state, synthesizing pending records for items
    /// the file does not mention yet. Nothing is written.
    pub fn load(&self, graph: &DependencyGraph) -> SchedulerResult<ProgressFile> {
        let mut progress = self.read_raw(graph)?;
        progress.fill_missing(graph);
        Ok(progress)
    }

    /// On-disk state exactly as stored
    fn read_raw(&self, graph: &DependencyGraph) -> SchedulerResult<ProgressFile> {
        let mut progress = if self.path.exists() {
            read_json::<ProgressFile>(&self.path).map_err(|e| self.explain_read_error(e))?
        } else {
            ProgressFile::new(graph.project())
        };
        if progress.project.is_empty() {
            progress.project = graph.project().to_string();
        }
        Ok(progress)
    }

    /// A status written by another tool fails the whole file; name the record
    /// so the user knows which one to fix
    fn explain_read_error(&self, message: String) -> SchedulerError {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return SchedulerError::Storage(message);
        };
        let Ok(raw) = serde_json::from_str::<serde_json::Value>(&content) else {
            return SchedulerError::Storage(message);
        };

        let unsupported = raw
            .get("issues")
            .and_then(|issues| issues.as_object())
            .and_then(|issues| {
                issues.iter().find_map(|(issue, record)| {
                    let status = record.get("status")?.as_str()?;
                    let known = serde_json::from_value::<IssueStatus>(status.into()).is_ok();
                    (!known).then(|| (issue.clone(), status.to_string()))
                })
            });

        match unsupported {
            Some((issue, status)) => SchedulerError::UnsupportedStatus {
                path: self.path.clone(),
                issue,
                status,
            },
            None => SchedulerError::Storage(message),
        }
    }

    /// Read one issue's record
    pub fn read(&self, graph: &DependencyGraph, id: &IssueId) -> SchedulerResult<ProgressRecord> {
        graph.item(id)?;
        Ok(self.load(graph)?.record(id))
    }

    /// Write the progress file with a pending record for every item
    pub fn initialize(&self, graph: &DependencyGraph) -> SchedulerResult<ProgressFile> {
        let _guard = LockGuard::acquire(&self.path).map_err(SchedulerError::Storage)?;
        let existed = self.path.exists();
        let mut progress = self.read_raw(graph)?;
        let added = progress.fill_missing(graph);

        if !existed || added > 0 || progress.created_at.is_none() {
            self.commit(&mut progress)?;
            log::info!(
                "[ProgressStore] Initialized {:?} ({} new pending records)",
                self.path,
                added
            );
        }
        Ok(progress)
    }

    /// Atomically move `id` from pending to in progress.
    ///
    /// `revalidate` runs against the freshly loaded state while the lock is
    /// held and returns the reasons the claim must not happen, if any. This is
    /// the only race-closing primitive in the system.
    ///
    /// `seen_revision` is the revision the caller based its decision on; a
    /// mismatch is a concurrent modification, handled by `revalidate`.
    pub fn try_claim<F>(
        &self,
        graph: &DependencyGraph,
        id: &IssueId,
        seen_revision: Option<u64>,
        revalidate: F,
    ) -> SchedulerResult<ClaimAttempt>
    where
        F: FnOnce(&ProgressFile) -> SchedulerResult<Vec<BlockReason>>,
    {
        graph.item(id)?;

        self.transact(graph, |progress| {
            if let Some(seen) = seen_revision {
                if seen != progress.revision {
                    log::debug!(
                        "[ProgressStore] Concurrent modification (revision {} -> {}), re-validating issue {}",
                        seen,
                        progress.revision,
                        id
                    );
                }
            }

            let status = progress.status(id);
            if status != IssueStatus::Pending {
                log::info!("[ProgressStore] Issue {} already {}; claim lost", id, status);
                return Ok((ClaimAttempt::AlreadyClaimed(status), false));
            }

            let reasons = revalidate(progress)?;
            if !reasons.is_empty() {
                return Ok((ClaimAttempt::Rejected(reasons), false));
            }

            let token = ClaimToken::generate();
            let record = progress.issues.entry(id.clone()).or_default();
            record.status = transition_status(record.status, IssueStatus::InProgress)?;
            record.started_at = Some(chrono::Utc::now().to_rfc3339());
            record.completed_at = None;
            record.claim_token = Some(token.clone());

            log::info!("[ProgressStore] Issue {} claimed", id);
            Ok((ClaimAttempt::Claimed(token), true))
        })
    }

    /// Move an in-progress issue to complete, proving ownership with `token`
    pub fn mark_complete(
        &self,
        graph: &DependencyGraph,
        id: &IssueId,
        token: &ClaimToken,
        result_ref: Option<&str>,
    ) -> SchedulerResult<ProgressRecord> {
        graph.item(id)?;

        self.transact(graph, |progress| {
            let record = progress.issues.entry(id.clone()).or_default();
            if record.status != IssueStatus::InProgress {
                return Err(SchedulerError::IssueNotInProgress(id.clone()));
            }
            match &record.claim_token {
                None => return Err(SchedulerError::MissingClaimToken(id.clone())),
                Some(held) if held != token => {
                    return Err(SchedulerError::InvalidClaimToken(id.clone()))
                }
                Some(_) => {}
            }

            record.status = transition_status(record.status, IssueStatus::Complete)?;
            record.completed_at = Some(chrono::Utc::now().to_rfc3339());
            if let Some(result_ref) = result_ref {
                record.result_ref = Some(result_ref.to_string());
            }

            log::info!("[ProgressStore] Issue {} marked complete", id);
            Ok((record.clone(), true))
        })
    }

    /// Lock, reload, mutate, and commit if the closure reports a change
    fn transact<T, F>(&self, graph: &DependencyGraph, mutate: F) -> SchedulerResult<T>
    where
        F: FnOnce(&mut ProgressFile) -> SchedulerResult<(T, bool)>,
    {
        let _guard = LockGuard::acquire(&self.path).map_err(SchedulerError::Storage)?;
        let mut progress = self.load(graph)?;

        let (value, dirty) = mutate(&mut progress)?;
        if dirty {
            self.commit(&mut progress)?;
        }

        Ok(value)
    }

    /// Bump the revision and atomically replace the file. Caller holds the lock.
    fn commit(&self, progress: &mut ProgressFile) -> SchedulerResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        if progress.created_at.is_none() {
            progress.created_at = Some(now.clone());
        }
        progress.updated_at = Some(now);
        progress.revision += 1;

        write_json(&self.path, progress).map_err(SchedulerError::Storage)?;
        log::debug!(
            "[ProgressStore] Committed revision {} to {:?}",
            progress.revision,
            self.path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DEFAULT_PARALLEL_LIMIT;
    use tempfile::TempDir;

    const GRAPH: &str = r#"
project: Store Test
batches:
  b1: { issues: [1, 2] }
issues:
  - { id: 1 }
  - { id: 2 }
"#;

    fn setup() -> (TempDir, DependencyGraph, ProgressStore) {
        let temp_dir = TempDir::new().unwrap();
        let graph = DependencyGraph::from_yaml_str(GRAPH, DEFAULT_PARALLEL_LIMIT).unwrap();
        let store = ProgressStore::new(temp_dir.path().join(".scheduler").join("progress.json"));
        (temp_dir, graph, store)
    }

    fn id(s: &str) -> IssueId {
        IssueId::new(s)
    }

    #[test]
    fn test_load_synthesizes_pending_without_writing() {
        let (_dir, graph, store) = setup();

        let progress = store.load(&graph).unwrap();
        assert_eq!(progress.project, "Store Test");
        assert_eq!(progress.issues.len(), 2);
        assert_eq!(progress.status(&id("1")), IssueStatus::Pending);
        assert!(!store.exists());
    }

    #[test]
    fn test_initialize_writes_pending_records() {
        let (_dir, graph, store) = setup();

        let progress = store.initialize(&graph).unwrap();
        assert!(store.exists());
        assert_eq!(progress.revision, 1);
        assert!(progress.created_at.is_some());

        // Second initialize is a no-op
        let again = store.initialize(&graph).unwrap();
        assert_eq!(again.revision, 1);
    }

    #[test]
    fn test_claim_then_complete() {
        let (_dir, graph, store) = setup();

        let token = match store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap() {
            ClaimAttempt::Claimed(token) => token,
            other => panic!("expected claim, got {other:?}"),
        };

        let record = store.read(&graph, &id("1")).unwrap();
        assert_eq!(record.status, IssueStatus::InProgress);
        assert!(record.started_at.is_some());
        assert_eq!(record.claim_token.as_ref(), Some(&token));

        let done = store
            .mark_complete(&graph, &id("1"), &token, Some("https://example.com/pull/1"))
            .unwrap();
        assert_eq!(done.status, IssueStatus::Complete);
        assert_eq!(done.result_ref.as_deref(), Some("https://example.com/pull/1"));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_second_claim_reports_already_claimed() {
        let (_dir, graph, store) = setup();

        store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap();
        let second = store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap();
        assert_eq!(second, ClaimAttempt::AlreadyClaimed(IssueStatus::InProgress));
    }

    #[test]
    fn test_rejected_claim_does_not_write() {
        let (_dir, graph, store) = setup();

        let attempt = store
            .try_claim(&graph, &id("2"), Some(0), |_| Ok(vec![BlockReason::RaceLost]))
            .unwrap();
        assert_eq!(attempt, ClaimAttempt::Rejected(vec![BlockReason::RaceLost]));
        assert!(!store.exists());
    }

    #[test]
    fn test_revalidate_sees_fresh_state() {
        let (_dir, graph, store) = setup();
        store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap();

        let attempt = store
            .try_claim(&graph, &id("2"), Some(0), |fresh| {
                assert!(fresh.is_in_progress(&id("1")));
                assert_eq!(fresh.revision, 1);
                Ok(vec![])
            })
            .unwrap();
        assert!(matches!(attempt, ClaimAttempt::Claimed(_)));
    }

    #[test]
    fn test_mark_complete_errors() {
        let (_dir, graph, store) = setup();

        let err = store
            .mark_complete(&graph, &id("1"), &ClaimToken::from("nope"), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::IssueNotInProgress(_)));

        store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap();
        let err = store
            .mark_complete(&graph, &id("1"), &ClaimToken::from("wrong"), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidClaimToken(_)));
        assert_eq!(store.read(&graph, &id("1")).unwrap().status, IssueStatus::InProgress);

        let err = store.read(&graph, &id("77")).unwrap_err();
        assert!(matches!(err, SchedulerError::IssueNotFound(_)));
    }

    #[test]
    fn test_reads_legacy_progress_file() {
        let (_dir, graph, store) = setup();
        let legacy = r#"{
  "project": "Store Test",
  "started_at": null,
  "updated_at": null,
  "issues": {
    "1": {"status": "complete", "started_at": "2024-01-01T00:00:00Z", "completed_at": "2024-01-02T00:00:00Z", "pr_url": "https://example.com/pull/9"},
    "2": {"status": "ready"}
  },
  "batches": {"b1": {"status": "complete"}}
}"#;
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), legacy).unwrap();

        let progress = store.load(&graph).unwrap();
        let first = progress.record(&id("1"));
        assert_eq!(first.status, IssueStatus::Complete);
        assert_eq!(first.result_ref.as_deref(), Some("https://example.com/pull/9"));
        assert_eq!(progress.status(&id("2")), IssueStatus::Pending);
        assert_eq!(progress.revision, 0);
    }

    #[test]
    fn test_unsupported_status_names_the_record() {
        let (_dir, graph, store) = setup();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"project": "x", "issues": {"1": {"status": "complete"}, "2": {"status": "failed"}}}"#,
        )
        .unwrap();

        let err = store.load(&graph).unwrap_err();
        match &err {
            SchedulerError::UnsupportedStatus { issue, status, .. } => {
                assert_eq!(issue, "2");
                assert_eq!(status, "failed");
            }
            other => panic!("expected unsupported status, got {other:?}"),
        }
        assert!(err.to_string().contains("Issue 2 has unsupported status \"failed\""));

        // Not a status problem: the raw parse error is kept
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(
            store.load(&graph).unwrap_err(),
            SchedulerError::Storage(_)
        ));
    }

    #[test]
    fn test_legacy_claim_without_token_cannot_complete() {
        let (_dir, graph, store) = setup();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"project": "x", "issues": {"1": {"status": "in_progress", "started_at": "2024-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();

        let err = store
            .mark_complete(&graph, &id("1"), &ClaimToken::from("anything"), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::MissingClaimToken(_)));
        assert!(err.to_string().contains("reset its status to \"pending\""));
        assert_eq!(store.read(&graph, &id("1")).unwrap().status, IssueStatus::InProgress);
    }

    #[test]
    fn test_records_for_removed_items_are_kept() {
        let (_dir, graph, store) = setup();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"project": "x", "issues": {"old": {"status": "complete"}}}"#,
        )
        .unwrap();

        store.try_claim(&graph, &id("1"), None, |_| Ok(vec![])).unwrap();
        let progress = store.load(&graph).unwrap();
        assert!(progress.is_complete(&id("old")));
        assert_eq!(progress.issues.len(), 3);
    }
}
