//! Time-triggered job scheduling
//!
//! The scheduler wakes every `tick_seconds`, loads the enabled schedules
//! and enqueues the jobs that are due. One-shot schedules fire when their
//! `run_at` has passed and are then disabled so they cannot fire again.
//! Cron schedules fire at most once per matching minute; the tick period
//! is usually finer than a minute, so firings are de-duplicated in memory
//! by `(schedule_id, minute)`.
//!
//! A tick never kills the loop: parse errors, store errors and queue
//! errors are logged and the next tick proceeds.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cron::CronSchedule;
use crate::error::Result;
use crate::queue::JobQueue;
use crate::store::{Schedule, ScheduleFilter, Store};

/// Periodic scheduler feeding due jobs into the queue
pub struct Scheduler {
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    tick: Duration,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    fired: Mutex<HashSet<(i64, i64)>>,
}

impl Scheduler {
    /// Create a scheduler ticking every `tick_seconds`
    pub fn new(store: Arc<Store>, queue: Arc<JobQueue>, tick_seconds: u64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            queue,
            tick: Duration::from_secs(tick_seconds),
            running: AtomicBool::new(false),
            shutdown,
            handle: Mutex::new(None),
            fired: Mutex::new(HashSet::new()),
        }
    }

    /// Check whether the tick loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the tick loop; idempotent
    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(tick_seconds = self.tick.as_secs(), "scheduler starting");
        let _ = self.shutdown.send(false);
        let scheduler = self.clone();
        let mut stop = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = scheduler.tick_once(Utc::now()).await {
                    error!(error = %e, "scheduler tick failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(scheduler.tick) => {}
                    // Ok means stop was requested; Err means the scheduler
                    // was dropped. Both end the loop.
                    _ = stop.wait_for(|s| *s) => break,
                }
            }
            info!("scheduler stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the loop, waiting for the in-flight tick to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }

    /// Run one scheduling pass for the instant `now`
    ///
    /// The loop calls this every tick; it is public so a pass can be
    /// driven manually against an arbitrary instant.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<()> {
        let schedules = self
            .store
            .list_schedules(&ScheduleFilter {
                enabled: Some(true),
                ..Default::default()
            })
            .await?;

        let minute_bucket = now.timestamp() / 60;
        self.prune_fired(minute_bucket).await;

        for schedule in schedules {
            if let Err(e) = self.consider(&schedule, now, minute_bucket).await {
                // One bad schedule must not starve the rest
                error!(schedule_id = schedule.id, error = %e, "schedule evaluation failed");
            }
        }

        Ok(())
    }

    async fn consider(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        minute_bucket: i64,
    ) -> Result<()> {
        if let Some(run_at) = schedule.run_at {
            if now >= run_at {
                self.enqueue(schedule).await?;
                // Disabling records the firing and prevents a re-fire
                self.store.set_schedule_enabled(schedule.id, false).await?;
            }
            return Ok(());
        }

        if let Some(expression) = schedule.cron_expression.as_deref() {
            let cron = CronSchedule::parse(expression)?;
            if !cron.matches(now) {
                return Ok(());
            }

            let key = (schedule.id, minute_bucket);
            {
                let mut fired = self.fired.lock().await;
                if !fired.insert(key) {
                    return Ok(());
                }
            }
            self.enqueue(schedule).await?;
        }

        Ok(())
    }

    async fn enqueue(&self, schedule: &Schedule) -> Result<()> {
        match self.store.get_job(schedule.job_id).await? {
            Some(job) => {
                debug!(job = %job.name, schedule_id = schedule.id, "schedule fired");
                if !self.queue.push(job).await {
                    warn!(schedule_id = schedule.id, "queue closed; dropping firing");
                }
            }
            None => {
                warn!(
                    schedule_id = schedule.id,
                    job_id = schedule.job_id,
                    "schedule references a missing job"
                );
            }
        }
        Ok(())
    }

    /// Drop de-duplication entries older than the previous minute
    async fn prune_fired(&self, minute_bucket: i64) {
        let mut fired = self.fired.lock().await;
        fired.retain(|(_, bucket)| *bucket >= minute_bucket - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, NewJob};
    use chrono::TimeZone;

    async fn fixture() -> (Arc<Store>, Arc<JobQueue>, Arc<Scheduler>) {
        let store = Arc::new(Store::connect("sqlite::memory:", 1).await.unwrap());
        let queue = Arc::new(JobQueue::unbounded());
        let scheduler = Arc::new(Scheduler::new(store.clone(), queue.clone(), 1));
        (store, queue, scheduler)
    }

    async fn seed_job(store: &Store, name: &str) -> i64 {
        let new = NewJob {
            name: name.to_string(),
            function_ref: "demo.echo".to_string(),
            kind: JobKind::Inline,
            ..NewJob::default()
        };
        store.create_job(&new, 0).await.unwrap().id
    }

    fn instant(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap()
    }

    #[tokio::test]
    async fn test_cron_fires_on_matching_minute_only() {
        let (store, queue, scheduler) = fixture().await;
        let job_id = seed_job(&store, "cron-job").await;
        store
            .create_schedule(job_id, Some("*/5 * * * *"), None, true)
            .await
            .unwrap();

        scheduler.tick_once(instant(12, 5, 0)).await.unwrap();
        assert_eq!(queue.len(), 1);

        scheduler.tick_once(instant(12, 6, 0)).await.unwrap();
        assert_eq!(queue.len(), 1);

        scheduler.tick_once(instant(12, 10, 0)).await.unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_cron_fires_once_per_minute_despite_fast_ticks() {
        let (store, queue, scheduler) = fixture().await;
        let job_id = seed_job(&store, "dedup-job").await;
        store
            .create_schedule(job_id, Some("* * * * *"), None, true)
            .await
            .unwrap();

        // Several ticks inside the same minute produce one firing
        for second in [0, 1, 2, 30, 59] {
            scheduler.tick_once(instant(9, 15, second)).await.unwrap();
        }
        assert_eq!(queue.len(), 1);

        scheduler.tick_once(instant(9, 16, 0)).await.unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_then_disables() {
        let (store, queue, scheduler) = fixture().await;
        let job_id = seed_job(&store, "oneshot-job").await;
        let run_at = instant(8, 0, 0);
        let schedule_id = store
            .create_schedule(job_id, None, Some(run_at), true)
            .await
            .unwrap();

        // Not due yet
        scheduler.tick_once(instant(7, 59, 59)).await.unwrap();
        assert_eq!(queue.len(), 0);

        scheduler.tick_once(instant(8, 0, 1)).await.unwrap();
        assert_eq!(queue.len(), 1);

        // The firing disabled the schedule; later ticks skip it
        scheduler.tick_once(instant(8, 0, 2)).await.unwrap();
        scheduler.tick_once(instant(9, 0, 0)).await.unwrap();
        assert_eq!(queue.len(), 1);

        let schedules = store
            .list_schedules(&ScheduleFilter::default())
            .await
            .unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, schedule_id);
        assert!(!schedules[0].enabled);
    }

    #[tokio::test]
    async fn test_disabled_schedules_are_ignored() {
        let (store, queue, scheduler) = fixture().await;
        let job_id = seed_job(&store, "disabled-job").await;
        store
            .create_schedule(job_id, Some("* * * * *"), None, false)
            .await
            .unwrap();

        scheduler.tick_once(instant(10, 0, 0)).await.unwrap();
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_bad_cron_does_not_kill_the_tick() {
        let (store, queue, scheduler) = fixture().await;
        let bad_job = seed_job(&store, "bad-cron").await;
        let good_job = seed_job(&store, "good-cron").await;

        store
            .create_schedule(bad_job, Some("nonsense"), None, true)
            .await
            .unwrap();
        store
            .create_schedule(good_job, Some("* * * * *"), None, true)
            .await
            .unwrap();

        scheduler.tick_once(instant(11, 30, 0)).await.unwrap();
        // The parse failure is logged; the valid schedule still fires
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_waits() {
        let (_store, _queue, scheduler) = fixture().await;

        scheduler.clone().start().await;
        scheduler.clone().start().await;
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());

        // Stopping again is a no-op
        scheduler.stop().await;
    }
}
