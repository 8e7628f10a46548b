use chrono::{Duration, NaiveDateTime, NaiveTime};
use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A recurring job. Receives the exchange wall-clock time it was fired at.
pub type Job = Arc<dyn Fn(NaiveDateTime) -> BoxFuture<'static, ()> + Send + Sync>;

/// Daily wall-clock fire time, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerTime(NaiveTime);

impl TriggerTime {
    pub fn new(hour: u32, minute: u32) -> anyhow::Result<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| anyhow::anyhow!("invalid trigger time {hour:02}:{minute:02}"))
    }

    pub fn time(self) -> NaiveTime {
        self.0
    }

    /// First occurrence strictly after `now`.
    pub fn next_after(self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.0);
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

impl FromStr for TriggerTime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("trigger time must be HH:MM (got {s:?})"))?;
        anyhow::ensure!(
            h.len() == 2 && m.len() == 2,
            "trigger time must be HH:MM (got {s:?})"
        );
        let hour: u32 = h
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid hour in trigger time {s:?}"))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid minute in trigger time {s:?}"))?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TriggerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// Where recurring jobs live and how due ones get fired.
#[async_trait::async_trait]
pub trait JobRegistry: Send {
    /// Adds a daily job whose first run is the next occurrence of `at` after `now`.
    fn register(&mut self, at: TriggerTime, job: Job, now: NaiveDateTime);

    /// Runs every job that is due at `now`, one after another. Returns how many ran.
    async fn poll_and_fire(&mut self, now: NaiveDateTime) -> usize;

    fn next_run(&self) -> Option<NaiveDateTime>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct DailyJob {
    at: TriggerTime,
    next_run: NaiveDateTime,
    job: Job,
}

/// In-process registry of once-a-day jobs.
///
/// A job that falls due fires once and is rescheduled for its next occurrence after the
/// poll time, so missed days are not replayed.
#[derive(Default)]
pub struct DailyJobRegistry {
    jobs: Vec<DailyJob>,
}

impl DailyJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_times(&self) -> Vec<TriggerTime> {
        self.jobs.iter().map(|j| j.at).collect()
    }
}

#[async_trait::async_trait]
impl JobRegistry for DailyJobRegistry {
    fn register(&mut self, at: TriggerTime, job: Job, now: NaiveDateTime) {
        let next_run = at.next_after(now);
        tracing::info!(trigger = %at, %next_run, "daily job registered");
        self.jobs.push(DailyJob { at, next_run, job });
    }

    async fn poll_and_fire(&mut self, now: NaiveDateTime) -> usize {
        let mut fired = 0;
        for entry in self.jobs.iter_mut() {
            if entry.next_run > now {
                continue;
            }
            tracing::debug!(trigger = %entry.at, scheduled = %entry.next_run, "daily job due");
            entry.next_run = entry.at.next_after(now);
            (entry.job)(now).await;
            fired += 1;
        }
        fired
    }

    fn next_run(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().map(|j| j.next_run).min()
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}
