//! Configuration file handling
//!
//! Reads and writes `.scheduler/config.yaml` for project-specific settings.
//! Command-line and environment overrides are applied on top by `merge_config`.

use crate::file_storage::{atomic_write, get_scheduler_dir, SCHEDULER_DIR};
use crate::graph::DEFAULT_PARALLEL_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const GRAPH_FILE: &str = "dependency-graph.yml";
pub const PROGRESS_FILE: &str = "progress.json";

/// Contents of `.scheduler/config.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SettingsFile {
    /// Graph file, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_path: Option<PathBuf>,
    /// Progress file, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_parallel_limit: Option<u32>,
}

impl SettingsFile {
    /// Settings that reproduce `config`, with paths under the project root
    /// stored relative to it
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let relative = |path: &Path| {
            path.strip_prefix(&config.project_root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf())
        };
        Self {
            graph_path: Some(relative(&config.graph_path)),
            progress_path: Some(relative(&config.progress_path)),
            default_parallel_limit: Some(config.default_parallel_limit),
        }
    }
}

/// Reads and writes `.scheduler/config.yaml`
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(project_root: &Path) -> Self {
        Self {
            config_path: get_scheduler_dir(project_root).join(CONFIG_FILE),
        }
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Settings from the file. A missing or empty file means no settings.
    pub fn read(&self) -> Result<SettingsFile, String> {
        if !self.exists() {
            return Ok(SettingsFile::default());
        }

        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| format!("Failed to read {:?}: {}", self.config_path, e))?;
        if content.trim().is_empty() {
            return Ok(SettingsFile::default());
        }

        serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse {:?}: {}", self.config_path, e))
    }

    /// Replace the settings file atomically
    pub fn write(&self, settings: &SettingsFile) -> Result<(), String> {
        let yaml = serde_yaml::to_string(settings)
            .map_err(|e| format!("Failed to serialize scheduler settings: {}", e))?;
        atomic_write(&self.config_path, &format!("{}{}", SETTINGS_HEADER, yaml))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

const SETTINGS_HEADER: &str = "# issue-scheduler settings. Relative paths resolve against the project root.\n";

/// Fully resolved settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub project_root: PathBuf,
    pub graph_path: PathBuf,
    pub progress_path: PathBuf,
    pub default_parallel_limit: u32,
}

impl SchedulerConfig {
    /// Defaults for a project root, ignoring any config file
    pub fn for_project(project_root: &Path) -> Self {
        merge_config(project_root, &SettingsFile::default(), None, None)
    }
}

/// Merge file settings with command-line/env overrides. Overrides win;
/// relative paths resolve against the project root.
pub fn merge_config(
    project_root: &Path,
    file_config: &SettingsFile,
    graph_path: Option<&Path>,
    progress_path: Option<&Path>,
) -> SchedulerConfig {
    let scheduler_dir = Path::new(SCHEDULER_DIR);

    let graph_path = graph_path
        .map(Path::to_path_buf)
        .or_else(|| file_config.graph_path.clone())
        .unwrap_or_else(|| scheduler_dir.join(GRAPH_FILE));
    let progress_path = progress_path
        .map(Path::to_path_buf)
        .or_else(|| file_config.progress_path.clone())
        .unwrap_or_else(|| scheduler_dir.join(PROGRESS_FILE));

    SchedulerConfig {
        project_root: project_root.to_path_buf(),
        graph_path: resolve(project_root, graph_path),
        progress_path: resolve(project_root, progress_path),
        default_parallel_limit: file_config
            .default_parallel_limit
            .unwrap_or(DEFAULT_PARALLEL_LIMIT),
    }
}

fn resolve(project_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
