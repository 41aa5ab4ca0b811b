//! Checkpoint Ledger
//!
//! Persists the status of every named task so a workflow can resume after
//! a crash, a failure or a deliberate early stop.
//!
//! The ledger is a plain text file. Lines starting with `#` are header
//! lines and are carried over verbatim, in order, on every rewrite. Every
//! other line is a record of the form `<task-name>: <status>` with status
//! `1` (complete), `0` (pending) or `-1` (failed):
//!
//! ```text
//! # Simflow State File
//! # Mon Oct 19 10:29:00 2026
//! # '1: complete', '0: pending', '-1: failed'
//! # ========================================
//! generate_synthetic_data: 1
//! evaluate_initial_misfit: -1
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Marker that opens a header line.
pub const COMMENT_MARKER: char = '#';

/// Status of a single task in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not attempted yet, or reset for a new iteration
    Pending,
    /// Finished successfully; skipped on the next run
    Complete,
    /// Raised on its last attempt; retried on the next run
    Failed,
}

impl TaskStatus {
    /// Integer code written to the ledger file.
    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Complete => 1,
            Self::Failed => -1,
        }
    }

    /// Parses an integer code from the ledger file.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Complete),
            -1 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A `(name, status)` pair as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// In-memory view of the ledger file.
///
/// Records keep the order they were read in; task names missing from the
/// file are appended as [`TaskStatus::Pending`]. Records for names that
/// the active task list does not know are kept and written back, but no
/// caller ever consults them.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    header: Vec<String>,
    records: IndexMap<String, TaskStatus>,
}

impl Ledger {
    /// Opens the ledger at `path` for the given task names.
    ///
    /// A missing file yields a fresh ledger with the default header and
    /// every task pending; nothing is written until [`Ledger::initialize`]
    /// or [`Ledger::save`] is called.
    pub fn open<'a, I>(path: impl Into<PathBuf>, task_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let path = path.into();

        let (header, persisted) = if path.exists() {
            let (header, records) = Self::load(&path)?;
            info!(
                "Loaded ledger {} ({} records)",
                path.display(),
                records.len()
            );
            (header, records)
        } else {
            debug!("No ledger at {}, starting fresh", path.display());
            (default_header(), Vec::new())
        };

        let mut records: IndexMap<String, TaskStatus> = persisted
            .into_iter()
            .map(|record| (record.name, record.status))
            .collect();

        for name in task_names {
            records
                .entry(name.to_string())
                .or_insert(TaskStatus::Pending);
        }

        Ok(Self {
            path,
            header,
            records,
        })
    }

    /// Reads and parses a ledger file into its header and records.
    pub fn load(path: &Path) -> Result<(Vec<String>, Vec<TaskRecord>)> {
        let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Parses ledger text.
    ///
    /// Blank lines are ignored. Any other line that is neither a header
    /// line nor a `name: code` pair with a known code is rejected with
    /// [`WorkflowError::LedgerParse`].
    pub fn parse(path: &Path, content: &str) -> Result<(Vec<String>, Vec<TaskRecord>)> {
        let mut header = Vec::new();
        let mut records = Vec::new();

        for (index, line) in content.lines().enumerate() {
            if line.starts_with(COMMENT_MARKER) {
                header.push(line.to_string());
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let malformed = || WorkflowError::LedgerParse {
                path: path.to_path_buf(),
                line: index + 1,
                content: line.to_string(),
            };

            let (name, code) = line.rsplit_once(':').ok_or_else(malformed)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(malformed());
            }
            let status = code
                .trim()
                .parse::<i32>()
                .ok()
                .and_then(TaskStatus::from_code)
                .ok_or_else(malformed)?;

            records.push(TaskRecord::new(name, status));
        }

        Ok((header, records))
    }

    /// Writes the ledger with its header if the file does not exist yet.
    ///
    /// Returns true when the file was created.
    pub fn initialize(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        self.save()?;
        info!("Created ledger {}", self.path.display());
        Ok(true)
    }

    /// Rewrites the whole file: header first, then one line per record.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
            }
        }

        // Write next to the target and rename so a crash never leaves a
        // truncated ledger behind.
        let staging = staging_path(&self.path);
        fs::write(&staging, self.render()).map_err(|e| WorkflowError::io(&staging, e))?;
        fs::rename(&staging, &self.path).map_err(|e| WorkflowError::io(&self.path, e))?;

        debug!("Saved ledger to {}", self.path.display());
        Ok(())
    }

    /// Renders the file contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for (name, status) in &self.records {
            out.push_str(&format!("{}: {}\n", name, status.code()));
        }
        out
    }

    /// Status of a task; names without a record read as pending.
    pub fn status(&self, name: &str) -> TaskStatus {
        self.records
            .get(name)
            .copied()
            .unwrap_or(TaskStatus::Pending)
    }

    pub fn set_status(&mut self, name: &str, status: TaskStatus) {
        match self.records.get_mut(name) {
            Some(current) => *current = status,
            None => {
                self.records.insert(name.to_string(), status);
            }
        }
    }

    pub fn mark_completed(&mut self, name: &str) {
        self.set_status(name, TaskStatus::Complete);
    }

    pub fn mark_failed(&mut self, name: &str) {
        self.set_status(name, TaskStatus::Failed);
    }

    /// Resets the given tasks to pending, e.g. before a new iteration.
    pub fn reset<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            self.set_status(name, TaskStatus::Pending);
        }
    }

    /// Resets complete tasks among `names` to pending.
    ///
    /// Returns how many records changed.
    pub fn invalidate_completed<'a, I>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut changed = 0;
        for name in names {
            if let Some(status) = self.records.get_mut(name) {
                if *status == TaskStatus::Complete {
                    *status = TaskStatus::Pending;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Records in ledger order.
    pub fn records(&self) -> impl Iterator<Item = TaskRecord> + '_ {
        self.records
            .iter()
            .map(|(name, status)| TaskRecord::new(name.clone(), *status))
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Header written when a ledger is first created.
pub fn default_header() -> Vec<String> {
    vec![
        "# Simflow State File".to_string(),
        format!("# {}", chrono::Local::now().format("%a %b %e %H:%M:%S %Y")),
        "# '1: complete', '0: pending', '-1: failed'".to_string(),
        "# ========================================".to_string(),
    ]
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TASKS: [&str; 3] = ["a", "b", "c"];

    #[test]
    fn test_status_codes() {
        for status in [TaskStatus::Pending, TaskStatus::Complete, TaskStatus::Failed] {
            assert_eq!(TaskStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TaskStatus::from_code(2), None);
    }

    #[test]
    fn test_fresh_ledger_is_all_pending() {
        let temp_dir = tempdir().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("sfstate.txt"), TASKS).unwrap();

        assert_eq!(ledger.len(), 3);
        assert!(TASKS.iter().all(|t| ledger.status(t) == TaskStatus::Pending));
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_initialize_writes_header_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sfstate.txt");
        let ledger = Ledger::open(&path, TASKS).unwrap();

        assert!(ledger.initialize().unwrap());
        assert!(!ledger.initialize().unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Simflow State File\n"));
        assert!(content.contains("'1: complete', '0: pending', '-1: failed'"));
        assert!(content.ends_with("a: 0\nb: 0\nc: 0\n"));
    }

    #[test]
    fn test_parse_header_and_records() {
        let content = "# one\n# two\nalpha: 1\n\nbeta : -1\ngamma:0\n";
        let (header, records) = Ledger::parse(Path::new("x"), content).unwrap();

        assert_eq!(header, vec!["# one", "# two"]);
        assert_eq!(
            records,
            vec![
                TaskRecord::new("alpha", TaskStatus::Complete),
                TaskRecord::new("beta", TaskStatus::Failed),
                TaskRecord::new("gamma", TaskStatus::Pending),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for bad in ["no separator", "a: two", "a: 5", ": 1"] {
            let err = Ledger::parse(Path::new("s.txt"), &format!("# h\n{}\n", bad)).unwrap_err();
            match err {
                WorkflowError::LedgerParse { line, content, .. } => {
                    assert_eq!(line, 2);
                    assert_eq!(content, bad);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_malformed_file_is_left_untouched() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sfstate.txt");
        fs::write(&path, "# header\na: 1\nbroken line\n").unwrap();

        assert!(Ledger::open(&path, TASKS).is_err());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# header\na: 1\nbroken line\n"
        );
    }

    #[test]
    fn test_unknown_names_preserved_missing_names_pending() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sfstate.txt");
        fs::write(&path, "# header\nold_task: 1\na: 1\n").unwrap();

        let ledger = Ledger::open(&path, TASKS).unwrap();
        assert_eq!(ledger.status("a"), TaskStatus::Complete);
        assert_eq!(ledger.status("b"), TaskStatus::Pending);
        assert_eq!(ledger.status("c"), TaskStatus::Pending);

        ledger.save().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# header\nold_task: 1\na: 1\nb: 0\nc: 0\n"
        );
    }

    #[test]
    fn test_header_survives_repeated_saves() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sfstate.txt");
        fs::write(&path, "# custom banner\n#   indented note  \n# third\na: 0\n").unwrap();

        let mut ledger = Ledger::open(&path, TASKS).unwrap();
        for name in TASKS {
            ledger.mark_completed(name);
            ledger.save().unwrap();
        }

        let reopened = Ledger::open(&path, TASKS).unwrap();
        assert_eq!(
            reopened.header(),
            &["# custom banner", "#   indented note  ", "# third"]
        );
    }

    #[test]
    fn test_save_leaves_no_staging_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sfstate.txt");
        let ledger = Ledger::open(&path, TASKS).unwrap();
        ledger.save().unwrap();

        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_reset_and_invalidate() {
        let temp_dir = tempdir().unwrap();
        let mut ledger = Ledger::open(temp_dir.path().join("s.txt"), TASKS).unwrap();
        ledger.mark_completed("a");
        ledger.mark_failed("b");
        ledger.mark_completed("c");

        assert_eq!(ledger.invalidate_completed(["a", "b"]), 1);
        assert_eq!(ledger.status("a"), TaskStatus::Pending);
        assert_eq!(ledger.status("b"), TaskStatus::Failed);
        assert_eq!(ledger.status("c"), TaskStatus::Complete);

        ledger.reset(TASKS);
        assert!(ledger.records().all(|r| r.status == TaskStatus::Pending));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Complete.to_string(), "complete");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }
}
