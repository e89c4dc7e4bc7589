//! Dependency graph of work items and batches
//!
//! Loaded once per invocation from `dependency-graph.yml`, validated, and
//! then only read. Validation rejects cycles in `depends_on` (three-colour
//! DFS), cycles through `required_batches`, dangling references, and
//! malformed batch membership. The optional `blocks` field is documentation
//! only: mismatches with `depends_on` are reported as warnings and never
//! influence scheduling.

pub mod source;

pub use source::{BatchDependencies, BatchSource, GraphSource, ItemSource};

use crate::error::{GraphValidationError, SchedulerError, SchedulerResult};
use crate::models::IssueId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::path::Path;

/// Default parallel limit for batches that do not declare one
pub const DEFAULT_PARALLEL_LIMIT: u32 = 10;

/// A unit of work. Immutable once the graph is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub id: IssueId,
    pub title: String,
    pub depends_on: Vec<IssueId>,
    pub soft_depends_on: Vec<IssueId>,
    pub conflicts_with: Vec<IssueId>,
    pub files: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<IssueId>>,
    pub batch_id: String,
}

/// An ordered, capacity-limited phase of work items
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub items: Vec<IssueId>,
    pub parallel_limit: u32,
    pub required_batches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

/// Validated, read-only dependency graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    project: String,
    /// Items in declaration order
    items: Vec<WorkItem>,
    index: HashMap<IssueId, usize>,
    batches: BTreeMap<String, Batch>,
    warnings: Vec<String>,
}

impl DependencyGraph {
    /// Read and validate a graph file
    pub fn load(path: &Path, default_parallel_limit: u32) -> SchedulerResult<Self> {
        if !path.exists() {
            return Err(SchedulerError::GraphNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Storage(format!("Failed to read {:?}: {}", path, e)))?;

        let source: GraphSource =
            serde_yaml::from_str(&content).map_err(|e| SchedulerError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let graph = Self::from_source(source, default_parallel_limit)?;
        log::debug!(
            "[DependencyGraph] Loaded {} issues in {} batches from {:?}",
            graph.items.len(),
            graph.batches.len(),
            path
        );
        Ok(graph)
    }

    /// Parse and validate YAML text
    pub fn from_yaml_str(yaml: &str, default_parallel_limit: u32) -> SchedulerResult<Self> {
        let source: GraphSource =
            serde_yaml::from_str(yaml).map_err(|e| SchedulerError::Parse {
                path: "<inline>".into(),
                message: e.to_string(),
            })?;
        Ok(Self::from_source(source, default_parallel_limit)?)
    }

    /// Build a graph from its parsed source, validating every invariant
    pub fn from_source(
        source: GraphSource,
        default_parallel_limit: u32,
    ) -> Result<Self, GraphValidationError> {
        // Item ids must be unique
        let mut index: HashMap<IssueId, usize> = HashMap::new();
        for (pos, item) in source.items.iter().enumerate() {
            if index.insert(item.id.clone(), pos).is_some() {
                return Err(GraphValidationError::DuplicateItem(item.id.clone()));
            }
        }

        // Batch membership: every listed item exists, each item in exactly one batch
        let mut membership: HashMap<IssueId, String> = HashMap::new();
        let mut batches: BTreeMap<String, Batch> = BTreeMap::new();
        for (batch_id, batch) in &source.batches {
            let parallel_limit = batch.parallel_limit.unwrap_or(default_parallel_limit);
            if parallel_limit == 0 {
                return Err(GraphValidationError::InvalidParallelLimit(batch_id.clone()));
            }

            let mut items = Vec::new();
            for item_id in &batch.items {
                if !index.contains_key(item_id) {
                    return Err(GraphValidationError::UnknownBatchItem {
                        batch: batch_id.clone(),
                        item: item_id.clone(),
                    });
                }
                if let Some(first) = membership.get(item_id) {
                    if first != batch_id {
                        return Err(GraphValidationError::DuplicateBatchMembership {
                            item: item_id.clone(),
                            first: first.clone(),
                            second: batch_id.clone(),
                        });
                    }
                    continue;
                }
                membership.insert(item_id.clone(), batch_id.clone());
                items.push(item_id.clone());
            }

            batches.insert(
                batch_id.clone(),
                Batch {
                    id: batch_id.clone(),
                    name: batch.name.clone().unwrap_or_else(|| batch_id.clone()),
                    items,
                    parallel_limit,
                    required_batches: batch.all_required_batches(),
                    estimated_duration: batch.estimated_duration.clone(),
                },
            );
        }

        for batch in batches.values() {
            for required in &batch.required_batches {
                if !batches.contains_key(required) {
                    return Err(GraphValidationError::MissingBatch {
                        batch: batch.id.clone(),
                        required: required.clone(),
                    });
                }
            }
        }

        let mut items = Vec::with_capacity(source.items.len());
        for item in source.items {
            let check_refs = |field: &'static str, refs: &[IssueId]| {
                for target in refs {
                    if !index.contains_key(target) {
                        return Err(GraphValidationError::MissingReference {
                            from: item.id.clone(),
                            field,
                            to: target.clone(),
                        });
                    }
                }
                Ok(())
            };
            check_refs("depends_on", &item.depends_on)?;
            check_refs("soft_depends_on", &item.soft_depends_on)?;
            check_refs("conflicts_with", &item.conflicts_with)?;

            let batch_id = membership
                .get(&item.id)
                .cloned()
                .ok_or_else(|| GraphValidationError::ItemWithoutBatch(item.id.clone()))?;

            items.push(WorkItem {
                title: item.title.unwrap_or_else(|| format!("Issue {}", item.id)),
                depends_on: dedup(item.depends_on),
                soft_depends_on: dedup(item.soft_depends_on),
                conflicts_with: dedup(item.conflicts_with),
                files: item.files.iter().map(|f| normalize_file(f)).collect(),
                blocks: item.blocks,
                batch_id,
                id: item.id,
            });
        }

        let mut graph = Self {
            project: source.project.unwrap_or_else(|| "Unknown".to_string()),
            items,
            index,
            batches,
            warnings: Vec::new(),
        };

        graph.validate()?;
        graph.warnings = graph.check_blocks_consistency();
        for warning in &graph.warnings {
            log::warn!("[DependencyGraph] {}", warning);
        }

        Ok(graph)
    }

    /// Reject cycles among issue dependencies, among batch requirements, and
    /// through both combined
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        let ids: Vec<IssueId> = self.items.iter().map(|i| i.id.clone()).collect();
        if let Some(cycle) = find_cycle(&ids, |id| {
            self.index
                .get(id)
                .map(|&pos| self.items[pos].depends_on.as_slice())
                .unwrap_or(&[])
        }) {
            return Err(GraphValidationError::CycleDetected(cycle));
        }

        let batch_ids: Vec<String> = self.batches.keys().cloned().collect();
        if let Some(cycle) = find_cycle(&batch_ids, |id| {
            self.batches
                .get(id)
                .map(|b| b.required_batches.as_slice())
                .unwrap_or(&[])
        }) {
            return Err(GraphValidationError::BatchCycle(cycle));
        }

        // An item waits on its hard deps and on every item of the batches its
        // own batch requires. Both acyclic on their own can still deadlock.
        let gating = self.gating_edges();
        if let Some(cycle) = find_cycle(&ids, |id| {
            gating.get(id).map(Vec::as_slice).unwrap_or(&[])
        }) {
            return Err(GraphValidationError::GatingCycle(cycle));
        }

        Ok(())
    }

    /// Everything each item has to wait for before it can start
    fn gating_edges(&self) -> HashMap<IssueId, Vec<IssueId>> {
        self.items
            .iter()
            .map(|item| {
                let mut waits_on = item.depends_on.clone();
                if let Some(batch) = self.batches.get(&item.batch_id) {
                    for required in &batch.required_batches {
                        if let Some(required) = self.batches.get(required) {
                            waits_on.extend(required.items.iter().cloned());
                        }
                    }
                }
                (item.id.clone(), waits_on)
            })
            .collect()
    }

    /// Cross-check the informational `blocks` field against `depends_on`
    fn check_blocks_consistency(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for item in &self.items {
            let Some(blocks) = &item.blocks else {
                continue;
            };
            for blocked in blocks {
                match self.get(blocked) {
                    None => warnings.push(format!(
                        "Issue {} lists non-existent issue {} in blocks",
                        item.id, blocked
                    )),
                    Some(other) if !other.depends_on.contains(&item.id) => {
                        warnings.push(format!(
                            "Issue {} says it blocks {}, but {} does not depend on {}",
                            item.id, blocked, blocked, item.id
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        for item in &self.items {
            for dep in &item.depends_on {
                let Some(dep_item) = self.get(dep) else {
                    continue;
                };
                if let Some(blocks) = &dep_item.blocks {
                    if !blocks.contains(&item.id) {
                        warnings.push(format!(
                            "Issue {} depends on {}, but {} does not list it in blocks",
                            item.id, dep, dep
                        ));
                    }
                }
            }
        }

        warnings
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// All items in declaration order
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    fn get(&self, id: &IssueId) -> Option<&WorkItem> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    pub fn item(&self, id: &IssueId) -> SchedulerResult<&WorkItem> {
        self.get(id)
            .ok_or_else(|| SchedulerError::IssueNotFound(id.clone()))
    }

    pub fn batch(&self, batch_id: &str) -> SchedulerResult<&Batch> {
        self.batches
            .get(batch_id)
            .ok_or_else(|| SchedulerError::BatchNotFound(batch_id.to_string()))
    }

    pub fn hard_deps(&self, id: &IssueId) -> SchedulerResult<&[IssueId]> {
        Ok(&self.item(id)?.depends_on)
    }

    pub fn soft_deps(&self, id: &IssueId) -> SchedulerResult<&[IssueId]> {
        Ok(&self.item(id)?.soft_depends_on)
    }

    /// Explicitly declared conflicts, in either direction
    pub fn conflict_edges(&self, id: &IssueId) -> SchedulerResult<BTreeSet<IssueId>> {
        let item = self.item(id)?;
        let mut edges: BTreeSet<IssueId> = item.conflicts_with.iter().cloned().collect();
        for other in &self.items {
            if other.id != *id && other.conflicts_with.contains(id) {
                edges.insert(other.id.clone());
            }
        }
        edges.remove(id);
        Ok(edges)
    }

    pub fn files_of(&self, id: &IssueId) -> SchedulerResult<&BTreeSet<String>> {
        Ok(&self.item(id)?.files)
    }

    pub fn batch_of(&self, id: &IssueId) -> SchedulerResult<&str> {
        Ok(&self.item(id)?.batch_id)
    }

    /// Items that list `id` as a hard dependency
    pub fn dependents(&self, id: &IssueId) -> Vec<&WorkItem> {
        self.items
            .iter()
            .filter(|item| item.depends_on.contains(id))
            .collect()
    }

    /// Topological order over `depends_on` (Kahn's algorithm), ties broken by
    /// declaration order
    pub fn execution_order(&self) -> Vec<IssueId> {
        let mut in_degree: Vec<usize> = self.items.iter().map(|i| i.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.items.len()];
        for (pos, item) in self.items.iter().enumerate() {
            for dep in &item.depends_on {
                if let Some(&dep_pos) = self.index.get(dep) {
                    dependents[dep_pos].push(pos);
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(pos, _)| pos)
            .collect();

        let mut order = Vec::with_capacity(self.items.len());
        while let Some(pos) = ready.pop_first() {
            order.push(self.items[pos].id.clone());
            for &next in &dependents[pos] {
                in_degree[next] = in_degree[next].saturating_sub(1);
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        order
    }

    /// Get statistics about the dependency graph
    pub fn stats(&self) -> DependencyStats {
        let total_dependencies = self.items.iter().map(|i| i.depends_on.len()).sum();

        let mut memo: HashMap<usize, usize> = HashMap::new();
        let max_depth = (0..self.items.len())
            .map(|pos| self.node_depth(pos, &mut memo))
            .max()
            .unwrap_or(0);

        let root_nodes = self
            .items
            .iter()
            .filter(|i| i.depends_on.is_empty())
            .map(|i| i.id.clone())
            .collect();

        let leaf_nodes = self
            .items
            .iter()
            .filter(|i| self.dependents(&i.id).is_empty())
            .map(|i| i.id.clone())
            .collect();

        DependencyStats {
            total_nodes: self.items.len(),
            total_batches: self.batches.len(),
            total_dependencies,
            max_depth,
            root_nodes,
            leaf_nodes,
        }
    }

    fn node_depth(&self, pos: usize, memo: &mut HashMap<usize, usize>) -> usize {
        if let Some(&depth) = memo.get(&pos) {
            return depth;
        }

        let depth = self.items[pos]
            .depends_on
            .iter()
            .filter_map(|dep| self.index.get(dep).copied())
            .map(|dep_pos| 1 + self.node_depth(dep_pos, memo))
            .max()
            .unwrap_or(0);

        memo.insert(pos, depth);
        depth
    }
}

/// Statistics about a dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStats {
    pub total_nodes: usize,
    pub total_batches: usize,
    pub total_dependencies: usize,
    /// Longest chain of hard dependencies
    pub max_depth: usize,
    /// Items with no dependencies
    pub root_nodes: Vec<IssueId>,
    /// Items nothing depends on
    pub leaf_nodes: Vec<IssueId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Three-colour DFS. Returns the first cycle found as a closed path
/// (`a → b → a`).
fn find_cycle<'a, K, F>(nodes: &'a [K], edges: F) -> Option<Vec<K>>
where
    K: Clone + Eq + Hash,
    F: Fn(&K) -> &'a [K] + Copy,
{
    let mut colour: HashMap<&K, Colour> = nodes.iter().map(|n| (n, Colour::White)).collect();
    let mut path: Vec<&K> = Vec::new();

    for node in nodes {
        if colour.get(node) == Some(&Colour::White) {
            if let Some(cycle) = visit(node, edges, &mut colour, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a, K, F>(
    node: &'a K,
    edges: F,
    colour: &mut HashMap<&'a K, Colour>,
    path: &mut Vec<&'a K>,
) -> Option<Vec<K>>
where
    K: Clone + Eq + Hash,
    F: Fn(&K) -> &'a [K] + Copy,
{
    colour.insert(node, Colour::Grey);
    path.push(node);

    for next in edges(node) {
        match colour.get(next).copied().unwrap_or(Colour::Black) {
            Colour::Grey => {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<K> = path[start..].iter().map(|&n| n.clone()).collect();
                cycle.push(next.clone());
                return Some(cycle);
            }
            Colour::White => {
                if let Some(cycle) = visit(next, edges, colour, path) {
                    return Some(cycle);
                }
            }
            Colour::Black => {}
        }
    }

    path.pop();
    colour.insert(node, Colour::Black);
    None
}

fn dedup(ids: Vec<IssueId>) -> Vec<IssueId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn normalize_file(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}
