//! Registry of active jobs, keyed by user id.
//!
//! Owned by the scheduler and injected at construction. Every mutation
//! happens under the write lock, so replacing a job and cancelling the
//! previous one is a single step. Removal and replacement then wait for the
//! cancelled loop to exit, outside the lock, so no tick of that job runs
//! once they return.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::scheduler::Cadence;

/// A running job and the means to stop it.
#[derive(Debug)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub user_id: String,
    pub cadence: Cadence,
    pub action: String,
    pub created_at: DateTime<Utc>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    pub fn new(
        user_id: String,
        cadence: Cadence,
        action: String,
        stop: watch::Sender<bool>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            cadence,
            action,
            created_at: Utc::now(),
            stop,
            handle,
        }
    }

    /// Signal the job loop to exit. A tick already running finishes; no
    /// new tick starts.
    pub fn cancel(self) -> JoinHandle<()> {
        // Send fails only if the loop already exited.
        let _ = self.stop.send(true);
        self.handle
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            user_id: self.user_id.clone(),
            cadence: self.cadence,
            action: self.action.clone(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub user_id: String,
    pub cadence: Cadence,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `job`, cancelling any job already registered for the same
    /// user. Returns true if a job was replaced.
    pub async fn install(&self, job: ScheduledJob) -> bool {
        let cancelled = {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.user_id.clone(), job).map(|previous| {
                tracing::info!(
                    user_id = %previous.user_id,
                    job_id = %previous.id,
                    "Replacing scheduled job"
                );
                previous.cancel()
            })
        };
        match cancelled {
            Some(handle) => {
                let _ = handle.await;
                true
            }
            None => false,
        }
    }

    /// Remove and cancel the job for `user_id`, waiting for a tick that is
    /// already running to finish.
    pub async fn remove(&self, user_id: &str) -> Option<JobInfo> {
        let (info, handle) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.remove(user_id)?;
            (job.info(), job.cancel())
        };
        let _ = handle.await;
        Some(info)
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.jobs.read().await.contains_key(user_id)
    }

    pub async fn get(&self, user_id: &str) -> Option<JobInfo> {
        self.jobs.read().await.get(user_id).map(ScheduledJob::info)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self
            .jobs
            .read()
            .await
            .values()
            .map(ScheduledJob::info)
            .collect();
        infos.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        infos
    }

    /// Cancel every job and wait for the loops to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<ScheduledJob> = self.jobs.write().await.drain().map(|(_, j)| j).collect();
        let count = drained.len();
        let handles: Vec<JoinHandle<()>> = drained.into_iter().map(ScheduledJob::cancel).collect();
        for handle in handles {
            let _ = handle.await;
        }
        if count > 0 {
            tracing::info!(count, "Stopped all scheduled jobs");
        }
    }
}
