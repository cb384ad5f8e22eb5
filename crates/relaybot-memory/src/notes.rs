//! Long-term memory notes kept in a single markdown file.

use std::fs;
use std::path::Path;

use crate::{Result, io_err};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    Ok(())
}

/// Read the memory file; missing file reads as empty.
pub fn read(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path).map_err(io_err(path))
}

/// Append one line, newline-separated from existing content.
pub fn append(path: &Path, line: &str) -> Result<()> {
    ensure_parent(path)?;
    let current = read(path)?;
    let updated = if current.is_empty() {
        line.to_string()
    } else {
        format!("{current}\n{line}")
    };
    fs::write(path, updated).map_err(io_err(path))
}

pub fn clear(path: &Path) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, "").map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory").join("MEMORY.md");

        assert_eq!(read(&path).unwrap(), "");
        append(&path, "first").unwrap();
        append(&path, "second").unwrap();
        assert_eq!(read(&path).unwrap(), "first\nsecond");

        clear(&path).unwrap();
        assert_eq!(read(&path).unwrap(), "");
    }
}
