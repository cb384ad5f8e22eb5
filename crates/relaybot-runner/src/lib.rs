//! relaybot-runner: serial execution of prompts through one external process.
//!
//! [`ProcessRunner`] spawns and supervises the external command, [`JobQueue`]
//! guarantees that at most one job runs at a time and that jobs run in arrival
//! order.

pub mod classify;
pub mod prompt;
pub mod queue;
pub mod runner;

pub use classify::classify_failure;
pub use prompt::{PassthroughPrompt, PromptBuilder};
pub use queue::{JobHandle, JobQueue, JobSummary};
pub use runner::{JobExecutor, ProcessRunner};
