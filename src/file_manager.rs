// src/file_manager.rs - Cache of the gcodes file list held by Moonraker
use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

const GCODES_ROOT: &str = "gcodes";

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl FileInfo {
    fn from_value(value: &Value) -> Option<Self> {
        let path = value
            .get("path")
            .or_else(|| value.get("filename"))
            .and_then(Value::as_str)?
            .to_string();
        Some(Self {
            path,
            size: value.get("size").and_then(Value::as_u64).unwrap_or(0),
            modified: to_datetime(value.get("modified").and_then(Value::as_f64).unwrap_or(0.0)),
            metadata: None,
        })
    }
}

fn to_datetime(epoch: f64) -> DateTime<Utc> {
    let secs = epoch.trunc() as i64;
    let nanos = (epoch.fract() * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}

/// What a file list notification did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum FileChange {
    Added(String),
    Removed(String),
    Modified(String),
    Moved { from: String, to: String },
}

impl FileChange {
    /// Path that needs fresh metadata after this change, if any.
    pub fn needs_metadata(&self) -> Option<&str> {
        match self {
            FileChange::Added(path) | FileChange::Modified(path) => Some(path),
            FileChange::Moved { to, .. } => Some(to),
            FileChange::Removed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileManager {
    files: BTreeMap<String, FileInfo>,
}

impl FileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with a `server.files.list` result.
    pub fn load_list(&mut self, result: &Value) {
        let Some(entries) = result.as_array() else {
            tracing::warn!("File list result is not an array");
            return;
        };
        self.files = entries
            .iter()
            .filter_map(FileInfo::from_value)
            .map(|info| (info.path.clone(), info))
            .collect();
        tracing::info!("Loaded {} files", self.files.len());
    }

    /// Apply a `notify_filelist_changed` payload.
    pub fn process_update(&mut self, data: &Value) -> Option<FileChange> {
        let action = data.get("action").and_then(Value::as_str)?;
        let item = data.get("item")?;
        if item.get("root").and_then(Value::as_str) != Some(GCODES_ROOT) {
            return None;
        }
        let info = FileInfo::from_value(item)?;
        let path = info.path.clone();
        let change = match action {
            "create_file" => {
                self.files.insert(path.clone(), info);
                FileChange::Added(path)
            }
            "delete_file" => {
                self.files.remove(&path)?;
                FileChange::Removed(path)
            }
            "modify_file" => {
                self.files.insert(path.clone(), info);
                FileChange::Modified(path)
            }
            "move_file" => {
                let from = data
                    .get("source_item")
                    .and_then(|s| s.get("path"))
                    .and_then(Value::as_str)?
                    .to_string();
                let metadata = self.files.remove(&from).and_then(|old| old.metadata);
                self.files.insert(path.clone(), FileInfo { metadata, ..info });
                FileChange::Moved { from, to: path }
            }
            other => {
                tracing::debug!("Ignoring file list action '{}'", other);
                return None;
            }
        };
        tracing::debug!("File list change: {:?}", change);
        Some(change)
    }

    pub fn set_metadata(&mut self, filename: &str, metadata: &Value) {
        match self.files.get_mut(filename) {
            Some(info) => info.metadata = Some(metadata.clone()),
            None => tracing::debug!("Metadata for unknown file {}", filename),
        }
    }

    pub fn get_file_info(&self, path: &str) -> Option<&FileInfo> {
        self.files.get(path)
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Newest first.
    pub fn file_list(&self) -> Vec<&FileInfo> {
        let mut files: Vec<&FileInfo> = self.files.values().collect();
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> FileManager {
        let mut files = FileManager::new();
        files.load_list(&json!([
            {"path": "benchy.gcode", "modified": 1700000000.5, "size": 1024, "permissions": "rw"},
            {"path": "cube.gcode", "modified": 1700000100.0, "size": 2048, "permissions": "rw"},
        ]));
        files
    }

    #[test]
    fn test_load_list_orders_newest_first() {
        let files = manager();
        let paths: Vec<&str> = files.file_list().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["cube.gcode", "benchy.gcode"]);
        assert_eq!(files.get_file_info("benchy.gcode").unwrap().size, 1024);
    }

    #[test]
    fn test_create_delete_and_move() {
        let mut files = manager();
        let created = files.process_update(&json!({
            "action": "create_file",
            "item": {"path": "new.gcode", "root": "gcodes", "size": 10, "modified": 1700000200.0},
        }));
        assert_eq!(created, Some(FileChange::Added("new.gcode".to_string())));
        assert_eq!(created.as_ref().and_then(FileChange::needs_metadata), Some("new.gcode"));

        files.set_metadata("cube.gcode", &json!({"estimated_time": 120}));
        let moved = files.process_update(&json!({
            "action": "move_file",
            "item": {"path": "parts/cube.gcode", "root": "gcodes", "size": 2048, "modified": 1700000100.0},
            "source_item": {"path": "cube.gcode", "root": "gcodes"},
        }));
        assert!(matches!(moved, Some(FileChange::Moved { .. })));
        assert!(!files.has_file("cube.gcode"));
        assert_eq!(
            files.get_file_info("parts/cube.gcode").unwrap().metadata,
            Some(json!({"estimated_time": 120}))
        );

        let removed = files.process_update(&json!({
            "action": "delete_file",
            "item": {"path": "benchy.gcode", "root": "gcodes"},
        }));
        assert_eq!(removed, Some(FileChange::Removed("benchy.gcode".to_string())));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_other_roots_are_ignored() {
        let mut files = manager();
        let change = files.process_update(&json!({
            "action": "create_file",
            "item": {"path": "printer.cfg", "root": "config"},
        }));
        assert_eq!(change, None);
        assert_eq!(files.len(), 2);
    }
}
