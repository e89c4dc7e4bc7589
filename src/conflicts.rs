//! Conflict Detector
//!
//! Two issues conflict when either declares the other in `conflicts_with`,
//! or when their declared file sets overlap. Declared edges capture conflicts
//! someone anticipated; the file overlap catches the ones nobody declared.
//! Conflicting issues are never in progress at the same time.

use crate::error::{SchedulerError, SchedulerResult};
use crate::graph::DependencyGraph;
use crate::models::{format_ids, IssueId};
use crate::progress::ProgressFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Declared with `conflicts_with`
    Explicit,
    /// Both issues modify the same file
    FileOverlap,
}

/// A conflict between a candidate issue and an in-progress issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub issue_id: IssueId,
    pub kind: ConflictKind,
    /// Shared files (empty for explicit conflicts without overlap)
    pub files: Vec<String>,
}

impl Conflict {
    pub fn reason(&self) -> &'static str {
        match self.kind {
            ConflictKind::Explicit => "Explicit conflict relationship",
            ConflictKind::FileOverlap => "Modifying same files",
        }
    }
}

/// How to order a group of conflicting issues.
///
/// Only `queue` exists: later requesters wait until the holder completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Queue,
}

impl FromStr for ResolutionStrategy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" | "sequential" => Ok(ResolutionStrategy::Queue),
            other => Err(SchedulerError::UnsupportedStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub issue: IssueId,
    pub action: String,
    /// 0 runs first
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    pub actions: Vec<ResolutionAction>,
    pub message: String,
}

pub struct ConflictDetector<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Every issue that must not run alongside `id`
    pub fn conflict_set(&self, id: &IssueId) -> SchedulerResult<BTreeSet<IssueId>> {
        let mut set = self.graph.conflict_edges(id)?;
        let files = self.graph.files_of(id)?;

        if !files.is_empty() {
            for other in self.graph.items() {
                if other.id != *id && !other.files.is_disjoint(files) {
                    set.insert(other.id.clone());
                }
            }
        }

        Ok(set)
    }

    /// Members of the conflict set currently in progress, in declaration order
    pub fn blocking_conflicts(
        &self,
        id: &IssueId,
        progress: &ProgressFile,
    ) -> SchedulerResult<Vec<IssueId>> {
        let set = self.conflict_set(id)?;
        Ok(self
            .graph
            .items()
            .iter()
            .filter(|item| set.contains(&item.id) && progress.is_in_progress(&item.id))
            .map(|item| item.id.clone())
            .collect())
    }

    /// Describe each conflict with an in-progress issue
    pub fn detect_conflicts(
        &self,
        id: &IssueId,
        progress: &ProgressFile,
    ) -> SchedulerResult<Vec<Conflict>> {
        let candidate = self.graph.item(id)?;
        let explicit = self.graph.conflict_edges(id)?;

        let mut conflicts = Vec::new();
        for other in self.graph.items() {
            if other.id == *id || !progress.is_in_progress(&other.id) {
                continue;
            }

            let shared: Vec<String> = candidate.files.intersection(&other.files).cloned().collect();
            if explicit.contains(&other.id) {
                conflicts.push(Conflict {
                    issue_id: other.id.clone(),
                    kind: ConflictKind::Explicit,
                    files: shared,
                });
            } else if !shared.is_empty() {
                conflicts.push(Conflict {
                    issue_id: other.id.clone(),
                    kind: ConflictKind::FileOverlap,
                    files: shared,
                });
            }
        }

        Ok(conflicts)
    }

    /// Order a group of conflicting issues. With `queue`, issues run one at a
    /// time in dependency order; the rest keep polling `can_start`.
    pub fn resolve_conflict(
        &self,
        strategy: ResolutionStrategy,
        ids: &[IssueId],
    ) -> SchedulerResult<ConflictResolution> {
        for id in ids {
            self.graph.item(id)?;
        }

        let order = self.graph.execution_order();
        let mut queued: Vec<IssueId> = order.into_iter().filter(|id| ids.contains(id)).collect();
        queued.dedup();

        let actions = queued
            .iter()
            .enumerate()
            .map(|(position, issue)| ResolutionAction {
                issue: issue.clone(),
                action: "queue".to_string(),
                position,
            })
            .collect();

        match strategy {
            ResolutionStrategy::Queue => Ok(ConflictResolution {
                strategy,
                actions,
                message: format!("Will execute sequentially: {}", format_ids(&queued)),
            }),
        }
    }
}
