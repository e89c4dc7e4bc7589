//! On-disk schema of `dependency-graph.yml`
//!
//! Mirrors the hand-edited file format. Nothing here is validated; see
//! [`super::DependencyGraph::from_source`].

use crate::models::IssueId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSource {
    /// Project name shown in summaries
    #[serde(default)]
    pub project: Option<String>,
    /// Batches keyed by batch id
    #[serde(default)]
    pub batches: BTreeMap<String, BatchSource>,
    /// Work item definitions
    #[serde(default, alias = "issues")]
    pub items: Vec<ItemSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSource {
    #[serde(default)]
    pub name: Option<String>,
    /// Falls back to the configured default when omitted
    #[serde(default)]
    pub parallel_limit: Option<u32>,
    #[serde(default, alias = "issues")]
    pub items: Vec<IssueId>,
    #[serde(default)]
    pub required_batches: Vec<String>,
    /// Older spelling of `required_batches`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BatchDependencies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

/// `dependencies:` may be a plain list or `{ all_from_batch: [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchDependencies {
    List(Vec<String>),
    Map {
        #[serde(default)]
        all_from_batch: Vec<String>,
    },
}

impl BatchDependencies {
    pub fn batch_ids(&self) -> &[String] {
        match self {
            BatchDependencies::List(ids) => ids,
            BatchDependencies::Map { all_from_batch } => all_from_batch,
        }
    }
}

impl BatchSource {
    /// `required_batches` merged with the legacy `dependencies` field, deduplicated
    pub fn all_required_batches(&self) -> Vec<String> {
        let mut required = self.required_batches.clone();
        if let Some(deps) = &self.dependencies {
            for id in deps.batch_ids() {
                if !required.contains(id) {
                    required.push(id.clone());
                }
            }
        }
        required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSource {
    pub id: IssueId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<IssueId>,
    #[serde(default)]
    pub soft_depends_on: Vec<IssueId>,
    #[serde(default)]
    pub conflicts_with: Vec<IssueId>,
    #[serde(default)]
    pub files: Vec<String>,
    /// Informational inverse of `depends_on`; only cross-checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<IssueId>>,
}
