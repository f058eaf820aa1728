//! Recurring action scheduler.
//!
//! One job per user. A job re-submits the user's stored action to the
//! language model on every cron fire, appends the action and its result to
//! the user's history, and emails the result. Jobs live only in memory.

pub mod engine;
pub mod registry;

pub use engine::{ActionScheduler, ActionTick};
pub use registry::{JobInfo, JobRegistry, ScheduledJob};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Top of every hour, UTC.
pub const DEFAULT_HOURLY_CRON: &str = "0 0 * * * *";
/// Midnight, UTC.
pub const DEFAULT_DAILY_CRON: &str = "0 0 0 * * *";

/// How often a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Cadence::Hourly),
            "daily" => Ok(Cadence::Daily),
            _ => Err(SchedulerError::InvalidCadence(s.to_string())),
        }
    }
}

/// Cron schedules backing each cadence (seconds-first, UTC).
#[derive(Debug, Clone)]
pub struct CadenceSchedules {
    hourly: cron::Schedule,
    daily: cron::Schedule,
}

impl CadenceSchedules {
    pub fn new(hourly: &str, daily: &str) -> Result<Self, SchedulerError> {
        Ok(Self {
            hourly: parse_cron(hourly)?,
            daily: parse_cron(daily)?,
        })
    }

    /// Next fire strictly after `after`.
    pub fn next_fire(&self, cadence: Cadence, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = match cadence {
            Cadence::Hourly => &self.hourly,
            Cadence::Daily => &self.daily,
        };
        schedule.after(&after).next()
    }
}

fn parse_cron(expression: &str) -> Result<cron::Schedule, SchedulerError> {
    cron::Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped => f.write_str("Scheduled action stopped"),
            StopOutcome::NotFound => f.write_str("No scheduled action found for this user"),
        }
    }
}

/// History keys for one tick. Both share the tick's timestamp.
pub fn history_keys(cadence: Cadence, at: DateTime<Utc>) -> (String, String) {
    let ms = at.timestamp_millis();
    (
        format!("{cadence}_action_{ms}"),
        format!("{cadence}_result_{ms}"),
    )
}
