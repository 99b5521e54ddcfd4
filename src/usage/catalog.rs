//! Log file discovery and composable file filters

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{Local, NaiveDate};
use glob::{glob_with, MatchOptions, Pattern};
use log::debug;

use crate::usage::config::{
    duration_from_secs, get_projects_dir, project_display_name, LOG_FILE_EXTENSION,
};
use crate::usage::models::FileRecord;

/// Predicate over a discovered file
#[derive(Clone)]
pub struct FileFilter(Arc<dyn Fn(&FileRecord) -> bool + Send + Sync>);

impl fmt::Debug for FileFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileFilter")
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl FileFilter {
    pub fn new(predicate: impl Fn(&FileRecord) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Accepts every file
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Files modified at or after `since`
    pub fn modified_since(since: SystemTime) -> Self {
        Self::new(move |record| record.modified >= since)
    }

    /// Files modified within `[start, end]`
    pub fn modified_between(start: SystemTime, end: SystemTime) -> Self {
        Self::new(move |record| record.modified >= start && record.modified <= end)
    }

    /// Files modified within the last `hours`, relative to the time of evaluation
    pub fn modified_within(hours: f64) -> Self {
        let window = duration_from_secs(hours * 3600.0);
        Self::new(move |record| match SystemTime::now().checked_sub(window) {
            Some(cutoff) => record.modified >= cutoff,
            None => true,
        })
    }

    /// Files modified on the given local calendar day
    pub fn modified_on(date: NaiveDate) -> Self {
        Self::new(move |record| {
            let modified: chrono::DateTime<Local> = record.modified.into();
            modified.date_naive() == date
        })
    }

    /// Files modified since local midnight, relative to the time of evaluation
    pub fn modified_today() -> Self {
        Self::new(|record| {
            let modified: chrono::DateTime<Local> = record.modified.into();
            modified.date_naive() == Local::now().date_naive()
        })
    }

    pub fn and(self, other: FileFilter) -> Self {
        Self::new(move |record| self.matches(record) && other.matches(record))
    }

    pub fn or(self, other: FileFilter) -> Self {
        Self::new(move |record| self.matches(record) || other.matches(record))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::new(move |record| !self.matches(record))
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        (self.0)(record)
    }

    /// Keep matching records, preserving their order
    pub fn apply(&self, records: Vec<FileRecord>) -> Vec<FileRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn has_hidden_component(path: &Path, base: &Path) -> bool {
    path.strip_prefix(base)
        .map(|rel| {
            rel.components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .unwrap_or(false)
}

/// List project directories directly under `<root>/projects`, sorted by path
fn list_project_dirs(projects_dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No projects directory at {:?}: {}", projects_dir, e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| !is_hidden(path) && path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Recursively find log files in one project directory
fn list_log_files(project_dir: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/**/*.{}",
        Pattern::escape(&project_dir.to_string_lossy()),
        LOG_FILE_EXTENSION
    );
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let mut files: Vec<PathBuf> = match glob_with(&pattern, options) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter(|path| !has_hidden_component(path, project_dir))
            .collect(),
        Err(e) => {
            debug!("Invalid glob pattern for {:?}: {}", project_dir, e);
            Vec::new()
        }
    };
    files.sort();
    files
}

fn file_record(path: PathBuf, project_dir: &Path, project_name: &str) -> Option<FileRecord> {
    let metadata = match fs::metadata(&path) {
        Ok(m) => m,
        Err(e) => {
            debug!("Dropping {:?}, metadata unavailable: {}", path, e);
            return None;
        }
    };
    if !metadata.is_file() {
        return None;
    }
    let modified = match metadata.modified() {
        Ok(t) => t,
        Err(e) => {
            debug!("Dropping {:?}, modification time unavailable: {}", path, e);
            return None;
        }
    };

    Some(FileRecord {
        path,
        project_dir: project_dir.to_path_buf(),
        project_name: project_name.to_string(),
        modified,
    })
}

/// Discover every log file under `<root>/projects`
///
/// A missing projects directory yields an empty list. Order is by project
/// directory, then by file path.
pub fn discover(root: &Path) -> Vec<FileRecord> {
    let projects_dir = get_projects_dir(root);
    let mut records = Vec::new();

    for project_dir in list_project_dirs(&projects_dir) {
        let project_name = project_display_name(&project_dir);
        records.extend(
            list_log_files(&project_dir)
                .into_iter()
                .filter_map(|path| file_record(path, &project_dir, &project_name)),
        );
    }

    records
}

/// Discover log files and keep those accepted by `filter`
pub fn discover_filtered(root: &Path, filter: &FileFilter) -> Vec<FileRecord> {
    filter.apply(discover(root))
}
