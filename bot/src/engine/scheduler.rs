use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{BotError, Result};

/// Work triggered once per weekly occurrence.
pub trait WeeklyJob: Send + Sync + 'static {
    /// Run for the window ending at `window_end` (the occurrence instant).
    fn run(&self, window_end: DateTime<Utc>) -> impl Future<Output = Result<()>> + Send;
}

/// A weekday and UTC time-of-day within ISO weeks (Monday first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    weekday: Weekday,
    time: NaiveTime,
}

impl Default for WeeklySchedule {
    /// Friday, 12:00 UTC.
    fn default() -> Self {
        Self {
            weekday: Weekday::Fri,
            time: NaiveTime::MIN + chrono::Duration::hours(12),
        }
    }
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, hour: u32) -> Result<Self> {
        let time = NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or_else(|| BotError::Config(format!("schedule hour {hour} is not in 0..24")))?;
        Ok(Self { weekday, time })
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    /// The first occurrence strictly after `now`: this ISO week's slot if
    /// still ahead, otherwise next week's.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let monday = today - chrono::Duration::days(i64::from(now.weekday().num_days_from_monday()));
        let day = monday + chrono::Duration::days(i64::from(self.weekday.num_days_from_monday()));
        let target = day.and_time(self.time).and_utc();
        if target > now {
            target
        } else {
            target + chrono::Duration::weeks(1)
        }
    }
}

/// Sleep until each occurrence, run the job, repeat. Returns only when cancelled.
///
/// Cancellation during the wait returns without running the job. A failing
/// job is logged and the next occurrence is scheduled as usual.
pub async fn run_weekly<J: WeeklyJob>(
    job: Arc<J>,
    schedule: WeeklySchedule,
    cancel: CancellationToken,
) {
    let mut anchor = Utc::now();
    loop {
        let target = schedule.next_after(anchor);
        let wait = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        info!(%target, "waiting until target to create playlists");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("weekly playlist scheduler cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        info!(%target, "running weekly playlist job");
        if let Err(e) = job.run(target).await {
            error!(%target, error = %e, "weekly playlist job failed");
        }
        // never schedule the same occurrence twice
        anchor = target.max(Utc::now());
    }
}
