//! Cron job scheduler: owns the live trigger of every enabled job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relaybot_runner::{JobQueue, PromptBuilder};
use relaybot_types::{Destination, ExecutionResult};

use crate::error::{CronError, Result};
use crate::store::CronStore;
use crate::{CronJob, SendCallback, schedule};

struct Inner {
    store: CronStore,
    /// Serializes read-modify-write cycles on the store.
    store_lock: Mutex<()>,
    queue: JobQueue,
    prompts: Arc<dyn PromptBuilder>,
    triggers: Mutex<HashMap<String, CancellationToken>>,
    send_callback: RwLock<Option<SendCallback>>,
}

/// Manages persisted cron jobs and their trigger tasks.
#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

/// Text delivered for a finished cron run.
pub fn format_cron_result(result: &ExecutionResult) -> String {
    match &result.error {
        Some(err) => format!("[Cron] Error: {err}"),
        None => format!("[Cron] {}", result.output),
    }
}

fn find<'a>(jobs: &'a mut [CronJob], id_or_prefix: &str) -> Option<&'a mut CronJob> {
    if id_or_prefix.is_empty() {
        return None;
    }
    jobs.iter_mut()
        .find(|j| j.id == id_or_prefix || j.id.starts_with(id_or_prefix))
}

impl CronScheduler {
    pub fn new(store: CronStore, queue: JobQueue, prompts: Arc<dyn PromptBuilder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                store_lock: Mutex::new(()),
                queue,
                prompts,
                triggers: Mutex::new(HashMap::new()),
                send_callback: RwLock::new(None),
            }),
        }
    }

    pub async fn set_send_callback(&self, callback: SendCallback) {
        *self.inner.send_callback.write().await = Some(callback);
    }

    /// Create, persist, and start a new job.
    pub async fn add(
        &self,
        schedule_expr: &str,
        prompt: &str,
        destination: &Destination,
    ) -> Result<CronJob> {
        let parsed = schedule::parse(schedule_expr)?;
        if schedule::next_after(&parsed, &Local::now()).is_none() {
            return Err(CronError::InvalidSchedule {
                expr: schedule_expr.to_string(),
                reason: "no upcoming fire time".into(),
            });
        }

        let job = CronJob {
            id: uuid::Uuid::new_v4().to_string(),
            schedule: schedule_expr.trim().to_string(),
            prompt: prompt.to_string(),
            channel_type: destination.channel_type.clone(),
            chat_id: destination.chat_id.clone(),
            enabled: true,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        {
            let _guard = self.inner.store_lock.lock().await;
            let mut jobs = self.inner.store.load()?;
            jobs.push(job.clone());
            self.inner.store.save(&jobs)?;
        }

        info!(cron_id = %job.id, schedule = %job.schedule, "Cron job added");
        register(&self.inner, job.clone()).await;
        Ok(job)
    }

    /// Remove the first job whose id equals or starts with `id_or_prefix`.
    pub async fn remove(&self, id_or_prefix: &str) -> Result<bool> {
        let removed = {
            let _guard = self.inner.store_lock.lock().await;
            let mut jobs = self.inner.store.load()?;
            let Some(id) = find(&mut jobs, id_or_prefix).map(|j| j.id.clone()) else {
                return Ok(false);
            };
            jobs.retain(|j| j.id != id);
            self.inner.store.save(&jobs)?;
            id
        };

        unregister(&self.inner, &removed).await;
        info!(cron_id = %removed, "Cron job removed");
        Ok(true)
    }

    /// Flip a job's enabled flag, starting or stopping its trigger.
    pub async fn toggle(&self, id_or_prefix: &str) -> Result<Option<CronJob>> {
        let job = {
            let _guard = self.inner.store_lock.lock().await;
            let mut jobs = self.inner.store.load()?;
            let Some(job) = find(&mut jobs, id_or_prefix) else {
                return Ok(None);
            };
            job.enabled = !job.enabled;
            let job = job.clone();
            self.inner.store.save(&jobs)?;
            job
        };

        if job.enabled {
            register(&self.inner, job.clone()).await;
        } else {
            unregister(&self.inner, &job.id).await;
        }
        info!(cron_id = %job.id, enabled = job.enabled, "Cron job toggled");
        Ok(Some(job))
    }

    pub async fn list(&self) -> Result<Vec<CronJob>> {
        let _guard = self.inner.store_lock.lock().await;
        self.inner.store.load()
    }

    /// Start triggers for every enabled persisted job. Returns how many started.
    pub async fn start_all(&self) -> Result<usize> {
        let jobs = self.list().await?;
        let mut started = 0;
        for job in jobs.into_iter().filter(|j| j.enabled) {
            register(&self.inner, job).await;
            started += 1;
        }
        if started > 0 {
            info!("Loaded {started} active cron jobs");
        }
        Ok(started)
    }

    pub async fn stop_all(&self) {
        let mut triggers = self.inner.triggers.lock().await;
        for (_, token) in triggers.drain() {
            token.cancel();
        }
        debug!("All cron triggers stopped");
    }

    /// Whether a live trigger exists for this exact job id.
    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.inner.triggers.lock().await.contains_key(id)
    }
}

async fn unregister(inner: &Inner, id: &str) {
    if let Some(token) = inner.triggers.lock().await.remove(id) {
        token.cancel();
    }
}

/// Start (or restart) the trigger task for `job`.
async fn register(inner: &Arc<Inner>, job: CronJob) {
    let parsed = match schedule::parse(&job.schedule) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(cron_id = %job.id, "Not scheduling cron job: {e}");
            return;
        }
    };

    let token = CancellationToken::new();
    if let Some(old) = inner
        .triggers
        .lock()
        .await
        .insert(job.id.clone(), token.clone())
    {
        old.cancel();
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        let mut cursor = Local::now();
        loop {
            let Some(next) = schedule::next_after(&parsed, &cursor) else {
                debug!(cron_id = %job.id, "Cron schedule has no further fire times");
                // A cancelled token means the entry was already removed or replaced.
                let mut triggers = inner.triggers.lock().await;
                if !token.is_cancelled() {
                    triggers.remove(&job.id);
                }
                break;
            };
            let wait = (next - Local::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            fire(&inner, &job).await;
            // Never fire the same instant twice, and skip missed ones after a stall.
            cursor = next.max(Local::now());
        }
    });
}

async fn fire(inner: &Arc<Inner>, job: &CronJob) {
    let prompt = inner.prompts.build(&job.prompt, &job.chat_id).await;
    let handle = inner.queue.enqueue(prompt, job.destination(), None).await;
    info!(cron_id = %job.id, job_id = %handle.id, position = handle.position, "Cron job fired");

    let inner = inner.clone();
    let channel_type = job.channel_type.clone();
    let chat_id = job.chat_id.clone();
    let cron_id = job.id.clone();
    tokio::spawn(async move {
        let result = handle.wait().await;
        let text = format_cron_result(&result);
        let callback = inner.send_callback.read().await.clone();
        match callback {
            Some(callback) => {
                if let Err(e) = callback(channel_type, chat_id, text).await {
                    error!(cron_id = %cron_id, "Failed to deliver cron result: {e:#}");
                }
            }
            None => warn!(cron_id = %cron_id, "No send callback registered, cron result dropped"),
        }
    });
}
