//! One markdown log file per day, pruned by age.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::{Result, io_err};

/// Append `entry` to the log for `now`'s date, creating it with a header.
pub fn append(dir: &Path, now: NaiveDateTime, entry: &str) -> Result<()> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let date = now.date().format("%Y-%m-%d").to_string();
    let path = dir.join(format!("{date}.md"));
    let line = format!("- [{}] {entry}\n", now.format("%H:%M:%S"));

    let is_new = !path.exists();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err(&path))?;
    if is_new {
        file.write_all(format!("# {date}\n\n").as_bytes())
            .map_err(io_err(&path))?;
    }
    file.write_all(line.as_bytes()).map_err(io_err(&path))
}

/// Delete `YYYY-MM-DD.md` files dated before `cutoff`. Other files are left alone.
pub fn clean_before(dir: &Path, cutoff: NaiveDate) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".md")) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            let path = entry.path();
            fs::remove_file(&path).map_err(io_err(&path))?;
            debug!(file = %path.display(), "Removed old daily log");
            removed += 1;
        }
    }
    Ok(removed)
}
