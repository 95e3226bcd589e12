//! Three background job classes: polling active RSS sources on their
//! configured cadence, a daily web-scraping sweep, and a weekly maintenance
//! compaction pass. The scheduler only decides *when*; running a job means
//! submitting tasks to the [`Executor`](crate::executor::Executor).

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use newsdesk_core::models::SourceKind;
use newsdesk_core::store::MetadataStore;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::executor::{Executor, Task};

#[derive(Debug, Clone)]
pub enum SchedulerJob {
    PollRssSource { source_id: String, user_id: String },
    WebSweep,
    WeeklyMaintenance,
}

pub struct Scheduler {
    store: Arc<dyn MetadataStore>,
    executor: Arc<Executor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<dyn MetadataStore>, executor: Arc<Executor>, config: SchedulerConfig) -> Self {
        Self { store, executor, config }
    }

    /// Runs the three tick loops concurrently until the process exits.
    /// Each loop is independent; one stalling does not block the others.
    pub async fn run(self: Arc<Self>) {
        let rss = self.clone();
        let web = self.clone();
        let maintenance = self.clone();
        tokio::join!(rss.run_rss_loop(), web.run_web_sweep_loop(), maintenance.run_weekly_maintenance_loop(),);
    }

    async fn run_rss_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_due_rss_sources().await {
                warn!(error = %e, "rss poll sweep failed");
            }
        }
    }

    /// Checks every active RSS source across every user and submits a poll
    /// job for any whose `last_fetched_at` is older than its (possibly
    /// backed-off) cadence. A job still running past `2 * cadence_seconds`
    /// is logged as a warning (misfire), not cancelled — a slow fetch
    /// finishing late is still useful, and retrying it on top would just
    /// add load.
    async fn poll_due_rss_sources(&self) -> anyhow::Result<()> {
        let now = Utc::now().timestamp();
        let sources = self.store.list_active_sources(Some(SourceKind::Rss)).await?;
        for source in sources {
            let cadence = if source.cadence_seconds > 0 { source.cadence_seconds } else { self.config.rss_default_cadence_s };
            // spec.md §4.18: once consecutive failures push a source into
            // the `error` health state, it is still polled, just with
            // exponential backoff capped at 16x the configured cadence.
            let cadence = cadence * backoff_multiplier(source.consecutive_failures);
            let due = source.last_fetched_at.map(|t| now - t >= cadence).unwrap_or(true);
            if !due {
                continue;
            }
            if let Some(last) = source.last_fetched_at {
                if now - last > 2 * cadence {
                    warn!(source_id = %source.id, overdue_by_s = now - last - cadence, "rss source poll is overdue, possible misfire");
                }
            }
            let job = Task::RunSchedulerJob {
                job: SchedulerJob::PollRssSource { source_id: source.id.clone(), user_id: source.user_id.clone() },
            };
            if let Err(e) = self.executor.submit(job) {
                warn!(source_id = %source.id, error = %e, "could not submit rss poll job");
            }
        }
        Ok(())
    }

    /// Fires once per day at `web_sweep_hour_utc`.
    async fn run_web_sweep_loop(&self) {
        loop {
            let wait = seconds_until_next_hour(self.config.web_sweep_hour_utc);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            info!("starting daily web-scraping sweep");
            if let Err(e) = self.executor.submit(Task::RunSchedulerJob { job: SchedulerJob::WebSweep }) {
                warn!(error = %e, "could not submit web sweep job");
            }
        }
    }

    /// Fires once per week (Monday, same hour as the daily sweep).
    async fn run_weekly_maintenance_loop(&self) {
        loop {
            let wait = seconds_until_next_monday(self.config.web_sweep_hour_utc);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            info!("starting weekly maintenance compaction pass");
            if let Err(e) = self.executor.submit(Task::RunSchedulerJob { job: SchedulerJob::WeeklyMaintenance }) {
                warn!(error = %e, "could not submit weekly maintenance job");
            }
        }
    }
}

/// Exponential backoff multiplier for a source's due-check cadence, keyed
/// off its consecutive failure count (spec.md §4.18: `error` health kicks
/// in at 3 consecutive failures; backoff is capped at 16x cadence).
/// Healthy sources (`< 3` failures) poll at their plain configured cadence.
fn backoff_multiplier(consecutive_failures: i64) -> i64 {
    if consecutive_failures < 3 {
        return 1;
    }
    let exponent = (consecutive_failures - 2).min(4) as u32;
    (1i64 << exponent).min(16)
}

fn seconds_until_next_hour(target_hour_utc: u32) -> u64 {
    let now = Utc::now();
    let mut next = now.date_naive().and_hms_opt(target_hour_utc.min(23), 0, 0).unwrap().and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).num_seconds().max(1) as u64
}

fn seconds_until_next_monday(target_hour_utc: u32) -> u64 {
    let now = Utc::now();
    let days_until_monday = (7 - now.weekday().num_days_from_monday()) % 7;
    let mut next = now.date_naive().and_hms_opt(target_hour_utc.min(23), 0, 0).unwrap().and_utc()
        + chrono::Duration::days(days_until_monday as i64);
    if next <= now {
        next += chrono::Duration::days(7);
    }
    (next - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_hour_wait_is_never_in_the_past() {
        for hour in 0..24 {
            assert!(seconds_until_next_hour(hour) > 0);
        }
    }

    #[test]
    fn next_monday_wait_is_at_most_one_week() {
        let wait = seconds_until_next_monday(3);
        assert!(wait > 0 && wait <= 7 * 24 * 3600);
    }

    #[test]
    fn backoff_multiplier_is_one_below_the_error_threshold() {
        assert_eq!(backoff_multiplier(0), 1);
        assert_eq!(backoff_multiplier(2), 1);
    }

    #[test]
    fn backoff_multiplier_grows_and_caps_at_sixteen() {
        assert_eq!(backoff_multiplier(3), 2);
        assert_eq!(backoff_multiplier(4), 4);
        assert_eq!(backoff_multiplier(5), 8);
        assert_eq!(backoff_multiplier(6), 16);
        assert_eq!(backoff_multiplier(100), 16);
    }
}
