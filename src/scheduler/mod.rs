//! Scheduler (C10): five wall-clock-anchored jobs driven by a one-minute
//! tick, plus a startup missed-work reconciler.
//!
//! A full cron crate is unnecessary for five fixed jobs; this follows the
//! teacher's own periodic-task idiom (`poll_forever`-style `loop` +
//! `tokio::time::interval`) rather than pulling in a scheduling dependency
//! the teacher never carries.

use crate::models::{ReportType, Session};
use crate::store::Store;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    FinancialBatch,
    MorningReport,
    MorningTriggers,
    AfternoonTriggers,
    AfternoonReport,
}

impl JobId {
    fn anchor(&self, cfg: &SchedulerConfig) -> (u32, u32) {
        match self {
            JobId::FinancialBatch => (0, 0),
            JobId::MorningReport => cfg.morning_report_time,
            JobId::MorningTriggers => cfg.morning_triggers_time,
            JobId::AfternoonTriggers => cfg.afternoon_triggers_time,
            JobId::AfternoonReport => cfg.afternoon_report_time,
        }
    }

    fn weekday_only(&self) -> bool {
        !matches!(self, JobId::FinancialBatch)
    }

    fn all() -> [JobId; 5] {
        [
            JobId::FinancialBatch,
            JobId::MorningReport,
            JobId::MorningTriggers,
            JobId::AfternoonTriggers,
            JobId::AfternoonReport,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub morning_report_time: (u32, u32),
    pub morning_triggers_time: (u32, u32),
    pub afternoon_triggers_time: (u32, u32),
    pub afternoon_report_time: (u32, u32),
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn matches_anchor(now: NaiveTime, anchor: (u32, u32)) -> bool {
    now.hour() == anchor.0 && now.minute() == anchor.1
}

fn past_anchor(now: NaiveTime, anchor: (u32, u32)) -> bool {
    (now.hour(), now.minute()) >= anchor
}

/// Missed-work reconciliation rules, run once at startup before the
/// periodic driver starts.
pub fn reconcile_on_startup(store: &Store, cfg: &SchedulerConfig, now: chrono::DateTime<Utc>) -> Vec<JobId> {
    let today = now.date_naive();
    let time = now.time();
    let mut due = Vec::new();

    let financial_stale = store
        .latest_filtered_stock_update()
        .ok()
        .flatten()
        .map(|ts| ts.date_naive() != today)
        .unwrap_or(true);
    if financial_stale {
        due.push(JobId::FinancialBatch);
    }

    if !is_weekday(today) {
        return due;
    }

    if past_anchor(time, cfg.morning_report_time)
        && store.report_result(ReportType::Morning, today).ok().flatten().is_none()
    {
        due.push(JobId::MorningReport);
    }
    if past_anchor(time, cfg.morning_triggers_time)
        && store.trigger_results_count(today, Session::Morning).unwrap_or(0) == 0
    {
        due.push(JobId::MorningTriggers);
    }
    if past_anchor(time, cfg.afternoon_triggers_time)
        && store.trigger_results_count(today, Session::Afternoon).unwrap_or(0) == 0
    {
        due.push(JobId::AfternoonTriggers);
    }
    if past_anchor(time, cfg.afternoon_report_time)
        && store.report_result(ReportType::Afternoon, today).ok().flatten().is_none()
    {
        due.push(JobId::AfternoonReport);
    }

    due
}

pub struct Scheduler {
    store: Arc<Store>,
    config: SchedulerConfig,
    last_run: HashMap<JobId, NaiveDate>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, config: SchedulerConfig, stop_rx: watch::Receiver<bool>) -> Self {
        Self {
            store,
            config,
            last_run: HashMap::new(),
            stop_rx,
        }
    }

    /// Runs forever, waking once a minute, firing any job whose anchor
    /// matches "now" and hasn't already run today. Exits promptly when the
    /// stop flag is set.
    pub async fn run<F, Fut>(&mut self, mut dispatch: F)
    where
        F: FnMut(JobId) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    let today = now.date_naive();
                    for job in JobId::all() {
                        if job.weekday_only() && !is_weekday(today) {
                            continue;
                        }
                        if self.last_run.get(&job) == Some(&today) {
                            continue;
                        }
                        if matches_anchor(now.time(), job.anchor(&self.config)) {
                            info!(job = ?job, "scheduler firing job");
                            dispatch(job).await;
                            self.last_run.insert(job, today);
                        }
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        warn!("scheduler received stop signal, shutting down");
                        return;
                    }
                }
            }
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SchedulerConfig {
        SchedulerConfig {
            morning_report_time: (8, 0),
            morning_triggers_time: (9, 10),
            afternoon_triggers_time: (15, 30),
            afternoon_report_time: (15, 40),
        }
    }

    #[test]
    fn weekend_skips_everything_but_financial_batch() {
        let store = Store::open_in_memory().unwrap();
        // 2026-08-01 is a Saturday.
        let saturday = chrono::NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc();
        let due = reconcile_on_startup(&store, &cfg(), saturday);
        assert_eq!(due, vec![JobId::FinancialBatch]);
    }

    #[test]
    fn weekday_past_all_anchors_with_empty_store_fires_everything() {
        let store = Store::open_in_memory().unwrap();
        let monday = chrono::NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap()
            .and_utc();
        let due = reconcile_on_startup(&store, &cfg(), monday);
        assert_eq!(due.len(), 5);
    }

    #[test]
    fn anchor_match_is_exact_minute() {
        let now = NaiveTime::from_hms_opt(9, 10, 0).unwrap();
        assert!(matches_anchor(now, (9, 10)));
        assert!(!matches_anchor(now, (9, 11)));
    }
}
