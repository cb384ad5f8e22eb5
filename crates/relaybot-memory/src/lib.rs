//! relaybot-memory: file-backed persona, long-term memory, and daily logs.
//!
//! Layout under the data directory:
//!
//! ```text
//! persona/SOUL.md  persona/USER.md  persona/MOOD.md
//! memory/MEMORY.md
//! memory/logs/YYYY-MM-DD.md
//! ```

pub mod daily_log;
pub mod notes;
pub mod persona;

use std::path::{Path, PathBuf};

pub use persona::{Persona, PersonaSection};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MemoryError>;

pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MemoryError + '_ {
    move |source| MemoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Entry point over all memory files rooted at one data directory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn persona_dir(&self) -> PathBuf {
        self.root.join("persona")
    }

    pub fn memory_file(&self) -> PathBuf {
        self.root.join("memory").join("MEMORY.md")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("memory").join("logs")
    }

    /// Read all persona sections, creating defaults for missing files.
    pub fn load_persona(&self) -> Result<Persona> {
        persona::load(&self.persona_dir())
    }

    pub fn update_persona(&self, section: PersonaSection, content: &str) -> Result<()> {
        persona::update(&self.persona_dir(), section, content)
    }

    pub fn read_memory(&self) -> Result<String> {
        notes::read(&self.memory_file())
    }

    pub fn append_memory(&self, line: &str) -> Result<()> {
        notes::append(&self.memory_file(), line)
    }

    pub fn clear_memory(&self) -> Result<()> {
        notes::clear(&self.memory_file())
    }

    pub fn append_daily_log(&self, entry: &str) -> Result<()> {
        daily_log::append(&self.logs_dir(), chrono::Local::now().naive_local(), entry)
    }

    /// Delete daily logs older than `retention_days`. Returns how many were removed.
    pub fn clean_old_logs(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Local::now().date_naive()
            - chrono::Duration::days(i64::from(retention_days));
        daily_log::clean_before(&self.logs_dir(), cutoff)
    }
}
