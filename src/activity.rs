//! Per-environment activity log.
//!
//! One file per local day under `log/researchflow/<env_id>/<yyyymmdd>.log`,
//! one tab-separated line per event.

use std::io::Write;
use std::path::PathBuf;

use crate::layout::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
    dir: PathBuf,
}

impl ActivityLog {
    pub fn new(layout: &Layout, env_id: &str) -> Self {
        Self {
            dir: layout.activity_log_dir(env_id),
        }
    }

    /// Today's log file.
    pub fn current_file(&self) -> PathBuf {
        let day = chrono::Local::now().format("%Y%m%d");
        self.dir.join(format!("{}.log", day))
    }

    /// Append one line. Failures are reported through tracing only.
    pub fn record(&self, level: Level, message: &str) {
        if let Err(e) = self.append(level, message) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to write activity log");
        }
    }

    fn append(&self, level: Level, message: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())?;
        // Keep one event per line.
        let message = message.replace(['\n', '\r'], " ");
        writeln!(
            file,
            "{}\t{}\t{}",
            chrono::Local::now().to_rfc3339(),
            level.as_str(),
            message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tab_separated_and_single_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ActivityLog::new(&Layout::new(temp.path()), "env-1");
        log.record(Level::Info, "created subflow");
        log.record(Level::Warning, "bad\nname");

        let path = log.current_file();
        assert!(path.starts_with(temp.path().join("data_governance/log/researchflow/env-1")));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields[1], "WARNING");
        assert_eq!(fields[2], "bad name");
    }
}
