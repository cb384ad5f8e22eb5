//! JSON file-backed cron job storage.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::CronJob;
use crate::error::{CronError, Result};

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CronError + '_ {
    move |source| CronError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Persistent set of cron jobs, stored as a pretty-printed JSON array.
///
/// Every mutation rewrites the whole file through a temp file and rename, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct CronStore {
    path: PathBuf,
}

impl CronStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all jobs. A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<CronJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Replace the stored set.
    pub fn save(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let content = serde_json::to_string_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), count = jobs.len(), "Cron store written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, enabled: bool) -> CronJob {
        CronJob {
            id: id.into(),
            schedule: "0 9 * * *".into(),
            prompt: "daily report".into(),
            channel_type: "slack".into(),
            chat_id: "C1".into(),
            enabled,
            created_at: 1700000000000,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::new(dir.path().join("crons.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::new(dir.path().join("data").join("crons.json"));
        store.save(&[job("a", true), job("b", false)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![job("a", true), job("b", false)]);
        assert!(!dir.path().join("data").join("crons.json.tmp").exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"chatId\": \"C1\""));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crons.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CronStore::new(path).load(), Err(CronError::Json(_))));
    }
}
