//! Periodic notification jobs
//!
//! Each job runs in its own task on a fixed period. The shared handle records
//! when each job last ran and when it runs next, for the status endpoint.

use super::dispatch::{self, Trigger};
use crate::models::StockThresholds;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    StockCheck,
    DonorReminders,
    WeeklySummary,
}

impl Job {
    pub const ALL: [Job; 3] = [Job::StockCheck, Job::DonorReminders, Job::WeeklySummary];

    pub fn id(self) -> &'static str {
        match self {
            Job::StockCheck => "stock_check",
            Job::DonorReminders => "donor_reminders",
            Job::WeeklySummary => "weekly_summary",
        }
    }

    pub fn period(self) -> Duration {
        match self {
            Job::StockCheck => Duration::hours(6),
            Job::DonorReminders => Duration::hours(24),
            Job::WeeklySummary => Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JobState {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub id: &'static str,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationStatus {
    pub background_tasks_running: bool,
    pub scheduler_jobs: Vec<ScheduledJob>,
}

/// Shared view of the scheduled jobs
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    jobs: Arc<RwLock<HashMap<Job, JobState>>>,
}

impl SchedulerHandle {
    async fn planned(&self, job: Job, next_run: DateTime<Utc>) {
        self.jobs.write().await.entry(job).or_default().next_run = Some(next_run);
    }

    async fn finished(&self, job: Job, at: DateTime<Utc>) {
        let mut jobs = self.jobs.write().await;
        let state = jobs.entry(job).or_default();
        state.last_run = Some(at);
        state.next_run = Some(at + job.period());
    }

    /// Jobs in a fixed order; empty when the scheduler was never started
    pub async fn status(&self) -> NotificationStatus {
        let jobs = self.jobs.read().await;
        let scheduler_jobs: Vec<ScheduledJob> = Job::ALL
            .into_iter()
            .filter_map(|job| {
                jobs.get(&job).map(|state| ScheduledJob {
                    id: job.id(),
                    last_run: state.last_run,
                    next_run: state.next_run,
                })
            })
            .collect();

        NotificationStatus {
            background_tasks_running: !scheduler_jobs.is_empty(),
            scheduler_jobs,
        }
    }
}

async fn run_job(
    job: Job,
    pool: &PgPool,
    thresholds: &StockThresholds,
    reminder_window: Duration,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    match job {
        Job::StockCheck => {
            dispatch::stock_check(pool, thresholds, Trigger::Scheduler).await?;
        }
        Job::DonorReminders => {
            dispatch::donor_reminders(pool, now, reminder_window, Trigger::Scheduler).await?;
        }
        Job::WeeklySummary => {
            dispatch::weekly_summary(pool, thresholds, now, Trigger::Scheduler).await?;
        }
    }
    Ok(())
}

/// Start one background task per job; the first run happens one period after start
pub async fn spawn(
    handle: SchedulerHandle,
    pool: PgPool,
    thresholds: StockThresholds,
    reminder_window: Duration,
) {
    for job in Job::ALL {
        let period = match job.period().to_std() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(job = job.id(), "Invalid job period: {}", e);
                continue;
            }
        };

        handle.planned(job, Utc::now() + job.period()).await;

        let handle = handle.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if let Err(e) = run_job(job, &pool, &thresholds, reminder_window).await {
                    tracing::error!(job = job.id(), "Scheduled notification job failed: {}", e);
                }
                handle.finished(job, Utc::now()).await;
            }
        });

        tracing::info!(
            job = job.id(),
            period_hours = job.period().num_hours(),
            "Scheduled notification job"
        );
    }
}
