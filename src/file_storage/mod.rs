//! File-based storage helpers for the scheduler
//!
//! All shared state lives in files under the project root so that many
//! short-lived processes can coordinate without a server:
//!
//! ## Storage Locations
//!
//! Project-local storage (`.scheduler/` in project root):
//! - `dependency-graph.yml` - Human-edited graph of issues and batches
//! - `progress.json` - Machine-written progress records (one per issue)
//! - `progress.json.lock` - Exclusive lock file guarding progress writes
//! - `config.yaml` - Optional settings

pub mod lock;

pub use lock::LockGuard;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Name of the project-local state directory
pub const SCHEDULER_DIR: &str = ".scheduler";

/// Get the .scheduler directory for a project
pub fn get_scheduler_dir(project_path: &Path) -> PathBuf {
    project_path.join(SCHEDULER_DIR)
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + fsync + rename)
///
/// Readers see either the old or the new content, never a partial write.
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| format!("Failed to create temp file {:?}: {}", temp_path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync temp file {:?}: {}", temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    Ok(())
}

/// `progress.json` -> `progress.json.tmp`
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Initialize the .scheduler directory for a project with .gitignore
pub fn init_scheduler_dir(project_path: &Path) -> FileResult<PathBuf> {
    let scheduler_dir = get_scheduler_dir(project_path);
    ensure_dir(&scheduler_dir)?;

    let gitignore_path = scheduler_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore_content = r#"# Runtime files (not for sharing)
*.lock
*.tmp
"#;
        fs::write(&gitignore_path, gitignore_content)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(scheduler_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_scheduler_dir() {
        let project_path = Path::new("/home/user/my-project");
        assert_eq!(
            get_scheduler_dir(project_path),
            PathBuf::from("/home/user/my-project/.scheduler")
        );
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("c");

        assert!(!nested_path.exists());
        ensure_dir(&nested_path).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("progress.json");

        atomic_write(&file_path, "{}").unwrap();
        atomic_write(&file_path, "{\"a\": 1}").unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "{\"a\": 1}");
        assert!(!temp_dir.path().join("progress.json.tmp").exists());
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        let temp = temp_path_for(Path::new("/x/progress.json"));
        assert_eq!(temp, PathBuf::from("/x/progress.json.tmp"));
    }

    #[test]
    fn test_read_write_json() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        struct TestData {
            name: String,
            value: i32,
        }

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("nested").join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_init_scheduler_dir() {
        let temp_dir = TempDir::new().unwrap();

        let dir = init_scheduler_dir(temp_dir.path()).unwrap();

        assert!(dir.exists());
        let gitignore_content = fs::read_to_string(dir.join(".gitignore")).unwrap();
        assert!(gitignore_content.contains("*.lock"));
        assert!(gitignore_content.contains("*.tmp"));
    }
}
