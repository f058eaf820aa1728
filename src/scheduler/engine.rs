//! Scheduling, stopping, and the per-job timer loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channels::MailSender;
use crate::error::{SchedulerError, TickError};
use crate::llm::LanguageModel;
use crate::scheduler::{
    Cadence, CadenceSchedules, JobInfo, JobRegistry, ScheduledJob, StopOutcome, history_keys,
};
use crate::store::UserStore;

/// Usage-accounting purpose for scheduled actions.
const PURPOSE: &str = "scheduled_action";

// ── Tick ────────────────────────────────────────────────────────────

/// Work done on every fire of a job.
pub struct ActionTick {
    users: Arc<dyn UserStore>,
    lm: Arc<LanguageModel>,
    mailer: Arc<dyn MailSender>,
}

impl ActionTick {
    pub fn new(
        users: Arc<dyn UserStore>,
        lm: Arc<LanguageModel>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self { users, lm, mailer }
    }

    /// Submit `action`, record action and result in the user's history,
    /// then email the result.
    ///
    /// The user is re-read on every tick so history written elsewhere
    /// between ticks is kept.
    pub async fn run(&self, user_id: &str, cadence: Cadence, action: &str) -> Result<(), TickError> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| TickError::UserGone {
                user_id: user_id.to_string(),
            })?;

        let result = self
            .lm
            .generate(action, user_id, PURPOSE)
            .await?
            .ok_or(TickError::EmptyModelResponse)?;

        let (action_key, result_key) = history_keys(cadence, Utc::now());
        user.append_info(action_key, action);
        user.append_info(result_key, result.as_str());
        self.users.save(&user).await?;

        self.mailer
            .send(&user.email, &format!("{cadence} action result"), &result)
            .await?;

        info!(user_id, %cadence, "Scheduled action delivered");
        Ok(())
    }
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Public face of the recurring-action subsystem.
pub struct ActionScheduler {
    users: Arc<dyn UserStore>,
    tick: Arc<ActionTick>,
    registry: Arc<JobRegistry>,
    schedules: Arc<CadenceSchedules>,
}

impl ActionScheduler {
    pub fn new(
        users: Arc<dyn UserStore>,
        lm: Arc<LanguageModel>,
        mailer: Arc<dyn MailSender>,
        registry: Arc<JobRegistry>,
        schedules: CadenceSchedules,
    ) -> Self {
        Self {
            tick: Arc::new(ActionTick::new(Arc::clone(&users), lm, mailer)),
            users,
            registry,
            schedules: Arc::new(schedules),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Start running `action` for `user_id` at `cadence`, replacing any
    /// job the user already has.
    pub async fn schedule(
        &self,
        action: &str,
        cadence: Cadence,
        user_id: &str,
    ) -> Result<String, SchedulerError> {
        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(SchedulerError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_job(
            Arc::clone(&self.tick),
            Arc::clone(&self.schedules),
            user_id.to_string(),
            cadence,
            action.to_string(),
            stop_rx,
        ));

        let job = ScheduledJob::new(
            user_id.to_string(),
            cadence,
            action.to_string(),
            stop_tx,
            handle,
        );
        let job_id = job.id;
        let replaced = self.registry.install(job).await;

        info!(user_id, %cadence, %job_id, replaced, "Scheduled action");
        Ok(format!("Action \"{action}\" scheduled to run {cadence}"))
    }

    /// Cancel the user's job. Safe to call repeatedly. A tick already in
    /// progress completes before this returns; none starts afterwards.
    pub async fn stop(&self, user_id: &str) -> StopOutcome {
        match self.registry.remove(user_id).await {
            Some(job) => {
                info!(user_id, job_id = %job.id, "Stopped scheduled action");
                StopOutcome::Stopped
            }
            None => StopOutcome::NotFound,
        }
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        self.registry.list().await
    }

    /// Stop every job; used on process shutdown.
    pub async fn shutdown(&self) {
        self.registry.stop_all().await;
    }
}

/// Timer loop for one job. Exits when the stop signal flips or its sender
/// is dropped. Tick failures are logged and the loop carries on.
async fn run_job(
    tick: Arc<ActionTick>,
    schedules: Arc<CadenceSchedules>,
    user_id: String,
    cadence: Cadence,
    action: String,
    mut stop: watch::Receiver<bool>,
) {
    let mut after = Utc::now();

    loop {
        let Some(next) = schedules.next_fire(cadence, after) else {
            warn!(user_id, %cadence, "Schedule has no further fire times");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(user_id, %cadence, next = %next, "Waiting for next tick");

        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return;
                }
                // Spurious wake; recompute.
                continue;
            }
            () = tokio::time::sleep(wait) => {}
        }

        // A stop that lands after this check is waited out by the registry.
        if *stop.borrow() {
            return;
        }

        if let Err(e) = tick.run(&user_id, cadence, &action).await {
            warn!(user_id, %cadence, error = %e, "Scheduled tick failed, job stays active");
        }

        // Never fire the same slot twice, and skip slots missed while busy.
        after = next.max(Utc::now());
    }
}
