use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Invalid cron schedule: {expr} ({reason})")]
    InvalidSchedule { expr: String, reason: String },
    #[error("Cron store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cron store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CronError>;
