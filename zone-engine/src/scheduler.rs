//! Cron-driven zone automation.
//!
//! Runs both zone kinds at the instants given by a six-field cron
//! expression (seconds first), evaluated in the host's local time:
//!
//! ```json
//! {
//!   "automation": {
//!     "schedule_enabled": true,
//!     "schedule_cron": "0 45 15 * * Mon-Fri"
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zone_common::config::AutomationConfig;

use crate::engine::MitigationEngine;

/// How often the scheduler checks for a due run
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A scheduled instant older than this is treated as missed, not due
const DUE_WINDOW_SECS: i64 = 60;

/// The most recent scheduled instant in `(last_run, now]` that is still
/// inside the due window.
fn due_instant<Tz: TimeZone>(
    schedule: &Schedule,
    last_run: Option<DateTime<Tz>>,
    now: DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let after = last_run.unwrap_or_else(|| now.clone() - chrono::Duration::hours(1));

    schedule
        .after(&after)
        .take_while(|scheduled| *scheduled <= now)
        .filter(|scheduled| {
            now.clone().signed_duration_since(scheduled.clone())
                < chrono::Duration::seconds(DUE_WINDOW_SECS)
        })
        .last()
}

/// Runs [`MitigationEngine::automate_all`] on a cron schedule.
pub struct AutomationScheduler {
    engine: Arc<MitigationEngine>,
    /// `None` when scheduling is disabled
    schedule: Option<Schedule>,
    last_run: RwLock<Option<DateTime<Local>>>,
}

impl AutomationScheduler {
    pub fn new(config: &AutomationConfig, engine: Arc<MitigationEngine>) -> Result<Self> {
        let schedule = if config.schedule_enabled {
            let schedule = Schedule::from_str(&config.schedule_cron)
                .with_context(|| format!("Invalid automation cron: {}", config.schedule_cron))?;
            info!(cron = %config.schedule_cron, "Automation schedule configured");
            Some(schedule)
        } else {
            None
        };

        Ok(Self {
            engine,
            schedule,
            last_run: RwLock::new(None),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Next scheduled instant, if enabled.
    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.schedule.as_ref()?.upcoming(Local).next()
    }

    pub async fn last_run(&self) -> Option<DateTime<Local>> {
        *self.last_run.read().await
    }

    /// Check every [`CHECK_INTERVAL`] until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(schedule) = &self.schedule else {
            info!("Automation schedule disabled, not starting");
            return;
        };

        info!(next = ?self.next_run(), "Automation scheduler started");

        let mut ticker = interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Local::now();
            let last = *self.last_run.read().await;
            let Some(scheduled) = due_instant(schedule, last, now) else {
                continue;
            };

            *self.last_run.write().await = Some(now);
            info!(scheduled = %scheduled, "Running scheduled automation");

            let runs = self.engine.automate_all(&shutdown.child_token()).await;
            let succeeded = runs.iter().filter(|r| r.is_ok()).count();
            debug!(succeeded, total = runs.len(), "Scheduled automation finished");
        }

        info!("Automation scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        // 2024-05-17 is a Friday
        Utc.with_ymd_and_hms(2024, 5, 17, h, m, s).unwrap()
    }

    fn weekday_close() -> Schedule {
        Schedule::from_str("0 45 15 * * Mon-Fri").unwrap()
    }

    #[test]
    fn test_due_within_window() {
        let schedule = weekday_close();
        assert_eq!(due_instant(&schedule, None, at(15, 45, 20)), Some(at(15, 45, 0)));
        assert_eq!(due_instant(&schedule, None, at(15, 44, 50)), None);
    }

    #[test]
    fn test_not_due_twice() {
        let schedule = weekday_close();
        assert_eq!(due_instant(&schedule, Some(at(15, 45, 20)), at(15, 45, 50)), None);
    }

    #[test]
    fn test_stale_instant_is_missed() {
        let schedule = weekday_close();
        assert_eq!(due_instant(&schedule, None, at(15, 47, 0)), None);
    }

    #[test]
    fn test_default_cron_parses() {
        let config = AutomationConfig::default();
        assert!(Schedule::from_str(&config.schedule_cron).is_ok());
        assert!(!config.schedule_enabled);
    }
}
