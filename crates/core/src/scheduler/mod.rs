pub mod registry;

use anyhow::Context;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::time::{market_now, TradingCalendar};

pub use registry::{DailyJobRegistry, Job, JobRegistry, TriggerTime};

pub const DEFAULT_TIME_POINTS: [&str; 3] = ["09:30", "13:00", "14:45"];
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const HEARTBEAT_EVERY_MINUTES: i64 = 60;

/// The work a trigger runs. Its error is logged by the scheduler and otherwise dropped.
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRun {
    SkippedNonTradingDay,
    Completed,
    Failed,
    Panicked,
}

/// Runs `task` if `now` falls on a trading day. Never propagates the task's failure:
/// errors and panics are logged and reported through the returned [`TaskRun`].
pub async fn safe_run_task(calendar: &TradingCalendar, task: &Task, now: NaiveDateTime) -> TaskRun {
    let date = now.date();
    if !calendar.is_trading_day(date) {
        tracing::info!(%date, mode = calendar.mode().as_str(), "not a trading day; skipping trigger");
        return TaskRun::SkippedNonTradingDay;
    }

    let started = Instant::now();
    tracing::info!(fired_at = %now, "scheduled analysis starting");

    match tokio::spawn(task()).await {
        Ok(Ok(())) => {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scheduled analysis finished"
            );
            TaskRun::Completed
        }
        Ok(Err(err)) => {
            let detail = format!("{err:#}");
            tracing::error!(error = %detail, fired_at = %now, "scheduled analysis failed");
            TaskRun::Failed
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, fired_at = %now, "scheduled analysis panicked");
            TaskRun::Panicked
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
    Running,
    Stopped,
}

/// Cloneable flag that asks a running scheduler to exit at its next iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fires a shared task at fixed daily times, but only on trading days.
pub struct TradingScheduler<R: JobRegistry = DailyJobRegistry> {
    registry: R,
    calendar: Arc<TradingCalendar>,
    time_points: Vec<TriggerTime>,
    poll_interval: Duration,
    offset: FixedOffset,
    shutdown: ShutdownHandle,
    state: SchedulerState,
}

impl TradingScheduler<DailyJobRegistry> {
    pub fn new(
        calendar: TradingCalendar,
        poll_interval: Duration,
        offset: FixedOffset,
    ) -> anyhow::Result<Self> {
        Self::with_registry(DailyJobRegistry::new(), calendar, poll_interval, offset)
    }
}

impl<R: JobRegistry> TradingScheduler<R> {
    pub fn with_registry(
        registry: R,
        calendar: TradingCalendar,
        poll_interval: Duration,
        offset: FixedOffset,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!poll_interval.is_zero(), "scheduler poll interval must be positive");
        Ok(Self {
            registry,
            calendar: Arc::new(calendar),
            time_points: Vec::new(),
            poll_interval,
            offset,
            shutdown: ShutdownHandle::default(),
            state: SchedulerState::Idle,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn time_points(&self) -> &[TriggerTime] {
        &self.time_points
    }

    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.registry.next_run()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.calendar.is_trading_day(date)
    }

    /// Today's date on the exchange clock.
    pub fn today(&self) -> NaiveDate {
        market_now(self.offset).date()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Registers one daily job per `HH:MM` entry, all running `task`.
    ///
    /// Every entry is parsed before anything is registered, so a bad entry leaves the
    /// scheduler untouched. Duplicates are registered once.
    pub fn register_triggers<S: AsRef<str>>(
        &mut self,
        time_points: &[S],
        task: Task,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state == SchedulerState::Idle,
            "triggers can only be registered once (scheduler is {:?})",
            self.state
        );

        let mut parsed: Vec<TriggerTime> = Vec::with_capacity(time_points.len());
        for raw in time_points {
            let raw = raw.as_ref();
            let at: TriggerTime = raw
                .parse()
                .with_context(|| format!("invalid time point {raw:?}"))?;
            if parsed.contains(&at) {
                tracing::warn!(trigger = %at, "duplicate time point ignored");
                continue;
            }
            parsed.push(at);
        }
        anyhow::ensure!(!parsed.is_empty(), "at least one time point is required");
        parsed.sort();

        let now = market_now(self.offset);
        for at in &parsed {
            let calendar = Arc::clone(&self.calendar);
            let task = Arc::clone(&task);
            let job: Job = Arc::new(move |fired_at| {
                let calendar = Arc::clone(&calendar);
                let task = Arc::clone(&task);
                async move {
                    safe_run_task(&calendar, &task, fired_at).await;
                }
                .boxed()
            });
            self.registry.register(*at, job, now);
        }

        self.time_points = parsed;
        self.state = SchedulerState::Armed;
        Ok(())
    }

    /// Polls for due triggers until shutdown is requested. A trigger that is running
    /// when shutdown is requested finishes first.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        match self.state {
            SchedulerState::Armed => {}
            SchedulerState::Stopped => anyhow::bail!("scheduler is stopped"),
            other => anyhow::bail!("scheduler is not armed (state {other:?})"),
        }
        self.state = SchedulerState::Running;

        let triggers = self
            .time_points
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let today = self.today();
        tracing::info!(
            %today,
            trading_day = self.is_trading_day(today),
            %triggers,
            mode = self.calendar.mode().as_str(),
            poll_secs = self.poll_interval.as_secs_f64(),
            next_run = ?self.registry.next_run(),
            "scheduler started"
        );

        let heartbeat_every = chrono::Duration::minutes(HEARTBEAT_EVERY_MINUTES);
        let mut last_heartbeat: Option<NaiveDateTime> = None;

        while !self.shutdown.is_requested() {
            let now = market_now(self.offset);
            let fired = self.registry.poll_and_fire(now).await;
            if fired > 0 {
                tracing::debug!(fired, "triggers fired");
            }

            if last_heartbeat.map_or(true, |at| now - at >= heartbeat_every) {
                tracing::info!(next_run = ?self.registry.next_run(), "scheduler heartbeat");
                last_heartbeat = Some(now);
            }

            if self.shutdown.is_requested() {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.state = SchedulerState::Stopped;
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Requests shutdown. A scheduler that is not running becomes Stopped immediately.
    pub fn stop(&mut self) {
        self.shutdown.request();
        if self.state != SchedulerState::Running {
            self.state = SchedulerState::Stopped;
        }
    }
}
