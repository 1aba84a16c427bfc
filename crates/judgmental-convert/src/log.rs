//! Append-only run log shared by every completion handler.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// One call writes one whole line; concurrent appends never interleave.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str) -> io::Result<()>;
}

#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLog {
    /// Truncates any log left by a previous run.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Blocking write on whichever thread runs the completion handler. Lines are
// short and rare next to a conversion, so this stays off `spawn_blocking`.
impl LogSink for FileLog {
    fn append(&self, line: &str) -> io::Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(record.as_bytes())?;
        file.flush()
    }
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for MemoryLog {
    fn append(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn file_log_truncates_and_keeps_lines_whole_across_threads() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "stale run\n").unwrap();

        let log = Arc::new(FileLog::create(&path).unwrap());
        let handles = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append(&format!("[thread {t}] line {i} {}", "x".repeat(200)))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 400);
        assert!(!text.contains("stale run"));
        assert!(lines
            .iter()
            .all(|l| l.starts_with("[thread ") && l.ends_with(&"x".repeat(200))));
    }
}
