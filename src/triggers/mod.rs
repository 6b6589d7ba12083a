//! Trigger Engine (C6): six composite detectors plus the realtime
//! `preSurge` add-on.
//!
//! Each detector shares one signature so `run_session` can fan them out
//! with `tokio::join!` the way spec.md's orchestrator "fires the three
//! detectors in parallel" — mirroring the teacher's parallel-scoring style
//! in its backtest batch code rather than a sequential loop.

use crate::error::AppResult;
use crate::gateway::MarketDataGateway;
use crate::indicators;
use crate::models::{Session, Ticker, TriggerResult, TriggerType};
use crate::normalize;
use crate::store::Store;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One ticker's joined current-day + previous-day row, the shared input to
/// every detector.
#[derive(Debug, Clone)]
pub struct UniverseRow {
    pub ticker: Ticker,
    pub name: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub prev_close: f64,
    pub prev_volume: f64,
    pub avg5_volume: f64,
    pub market_cap: i64,
    pub trading_value: i64,
}

impl UniverseRow {
    pub fn is_uptrend(&self) -> bool {
        self.close > self.open
    }

    pub fn volume_change_pct(&self) -> f64 {
        indicators::volume_change(self.volume, self.prev_volume)
    }

    pub fn gap_pct(&self) -> f64 {
        indicators::gap_ratio(self.open, self.prev_close)
    }

    pub fn intraday_pct(&self) -> f64 {
        indicators::intraday_change(self.close, self.open)
    }

    pub fn inflow_ratio(&self) -> f64 {
        indicators::fund_inflow_ratio(self.trading_value as f64, self.market_cap as f64)
    }

    pub fn closing_strength(&self) -> f64 {
        indicators::closing_strength(self.close, self.high, self.low)
    }
}

#[derive(Debug, Clone)]
pub struct TriggerCandidate {
    pub row: UniverseRow,
    pub composite_score: f64,
}

fn compose_and_select(
    candidates: Vec<(UniverseRow, Vec<f64>)>,
    weights: &[f64],
) -> Vec<TriggerCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let n_cols = weights.len();
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(candidates.len()); n_cols];
    for (_, metrics) in &candidates {
        for (i, m) in metrics.iter().enumerate() {
            columns[i].push(*m);
        }
    }
    let normalized: Vec<Vec<f64>> = columns.iter().map(|c| normalize::min_max(c, 0.0, 1.0)).collect();
    let refs: Vec<&[f64]> = normalized.iter().map(|c| c.as_slice()).collect();
    let scores = normalize::weighted_composition(&refs, weights).unwrap_or_default();

    let mut out: Vec<TriggerCandidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|((row, _), composite_score)| TriggerCandidate { row, composite_score })
        .collect();
    out.sort_by(|a, b| b.composite_score.partial_cmp(&a.composite_score).unwrap());
    out.truncate(3);
    out
}

pub fn detect_volume_surge(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.is_uptrend() && r.volume_change_pct() >= 30.0)
        .map(|r| (r.clone(), vec![r.volume_change_pct(), r.volume]))
        .collect();
    compose_and_select(candidates, &[0.6, 0.4])
}

pub fn detect_gap_up(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.is_uptrend() && r.gap_pct() >= 1.0)
        .map(|r| (r.clone(), vec![r.gap_pct(), r.intraday_pct(), r.trading_value as f64]))
        .collect();
    compose_and_select(candidates, &[0.5, 0.3, 0.2])
}

pub fn detect_fund_inflow(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.is_uptrend())
        .map(|r| (r.clone(), vec![r.inflow_ratio(), r.trading_value as f64, r.intraday_pct()]))
        .collect();
    compose_and_select(candidates, &[0.5, 0.3, 0.2])
}

pub fn detect_intraday_rise(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.intraday_pct() >= 3.0)
        .map(|r| (r.clone(), vec![r.intraday_pct(), r.trading_value as f64]))
        .collect();
    compose_and_select(candidates, &[0.6, 0.4])
}

pub fn detect_closing_strength(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.volume_change_pct() > 0.0 && r.close > r.open)
        .map(|r| (r.clone(), vec![r.closing_strength(), r.volume_change_pct(), r.trading_value as f64]))
        .collect();
    compose_and_select(candidates, &[0.5, 0.3, 0.2])
}

pub fn detect_sideways_volume(rows: &[UniverseRow]) -> Vec<TriggerCandidate> {
    let candidates: Vec<(UniverseRow, Vec<f64>)> = rows
        .iter()
        .filter(|r| r.intraday_pct().abs() <= 5.0 && r.volume_change_pct() >= 50.0)
        .map(|r| (r.clone(), vec![r.volume_change_pct(), r.trading_value as f64]))
        .collect();
    compose_and_select(candidates, &[0.6, 0.4])
}

/// Realtime-only add-on, invoked directly from the poller loop rather than
/// the session orchestrator.
pub fn detect_pre_surge(current_volume: f64, avg5_volume: f64, change_rate: f64) -> Option<f64> {
    if avg5_volume <= 0.0 {
        return None;
    }
    let ratio = current_volume / avg5_volume;
    if ratio >= 3.0 && change_rate.abs() <= 3.0 {
        Some((ratio / 5.0).min(1.0))
    } else {
        None
    }
}

fn to_trigger_results(
    date: NaiveDate,
    session: Session,
    trigger_type: TriggerType,
    candidates: Vec<TriggerCandidate>,
) -> Vec<TriggerResult> {
    let now = Utc::now();
    candidates
        .into_iter()
        .map(|c| {
            let change_rate = c.row.intraday_pct();
            TriggerResult {
                id: None,
                date,
                session,
                ticker: c.row.ticker,
                trigger_type,
                name: c.row.name,
                price: c.row.close as i64,
                change_rate,
                volume: c.row.volume as i64,
                trading_value: c.row.trading_value,
                composite_score: c.composite_score,
                detected_at: now,
            }
        })
        .collect()
}

/// Joins the filtered universe against today's snapshot, yesterday's
/// snapshot, and a 5-day volume average, producing the rows every detector
/// needs. Shared by the scheduler's session jobs and the manual
/// `/triggers/run/:session` endpoint.
pub async fn assemble_universe(
    store: &Arc<Store>,
    gateway: &Arc<dyn MarketDataGateway>,
    date: NaiveDate,
) -> AppResult<Vec<UniverseRow>> {
    let stocks = store.filtered_stocks_passing().map_err(crate::error::AppError::Internal)?;
    let snapshot = gateway.snapshot(date).await?;
    let prev_date = gateway.previous_trading_day(date, 10).await?;
    let prev_snapshot = gateway.snapshot(prev_date).await.unwrap_or_default();

    let mut rows = Vec::new();
    for stock in &stocks {
        let Some(today) = snapshot.get(&stock.ticker) else { continue };
        let prev = prev_snapshot.get(&stock.ticker);
        let prev_close = prev.map(|p| p.close).unwrap_or(today.close);
        let prev_volume = prev.map(|p| p.volume).unwrap_or(today.volume);

        let start = date - chrono::Duration::days(10);
        let bars = gateway.history(&stock.ticker, start, date).await.unwrap_or_default();
        let avg5_volume = if bars.len() >= 5 {
            bars.iter().rev().take(5).map(|b| b.volume).sum::<f64>() / 5.0
        } else {
            prev_volume
        };

        rows.push(UniverseRow {
            ticker: stock.ticker.clone(),
            name: stock.name.clone(),
            open: today.open,
            high: today.high,
            low: today.low,
            close: today.close,
            volume: today.volume,
            prev_close,
            prev_volume,
            avg5_volume,
            market_cap: today.market_cap,
            trading_value: today.trading_value as i64,
        });
    }
    Ok(rows)
}

/// Fires the three same-session detectors concurrently, collates, and
/// replaces the `(date, session)` row set atomically — safe to re-run.
pub async fn run_session(
    store: &Arc<Store>,
    date: NaiveDate,
    session: Session,
    rows: Vec<UniverseRow>,
    on_afternoon_complete: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Result<HashMap<TriggerType, Vec<TriggerResult>>> {
    let (detectors, types): (Vec<_>, Vec<_>) = match session {
        Session::Morning => (
            vec![
                detect_volume_surge(&rows),
                detect_gap_up(&rows),
                detect_fund_inflow(&rows),
            ],
            vec![TriggerType::VolumeSurge, TriggerType::GapUp, TriggerType::FundInflow],
        ),
        Session::Afternoon => (
            vec![
                detect_intraday_rise(&rows),
                detect_closing_strength(&rows),
                detect_sideways_volume(&rows),
            ],
            vec![
                TriggerType::IntradayRise,
                TriggerType::ClosingStrength,
                TriggerType::SidewaysVolume,
            ],
        ),
    };

    let mut by_type = HashMap::new();
    let mut all_results = Vec::new();
    for (trigger_type, candidates) in types.into_iter().zip(detectors) {
        let results = to_trigger_results(date, session, trigger_type, candidates);
        all_results.extend(results.clone());
        by_type.insert(trigger_type, results);
    }

    store.replace_trigger_results(date, session, &all_results)?;

    if session == Session::Afternoon {
        if let Some(cb) = on_afternoon_complete {
            cb();
        }
    }

    Ok(by_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ticker: &str, open: f64, close: f64, volume: f64, prev_volume: f64) -> UniverseRow {
        UniverseRow {
            ticker: Ticker::try_from(ticker).unwrap(),
            name: "Sample".into(),
            open,
            high: close.max(open) * 1.01,
            low: open.min(close) * 0.99,
            close,
            volume,
            prev_close: open,
            prev_volume,
            avg5_volume: prev_volume,
            market_cap: 1_000_000_000_000,
            trading_value: 10_000_000_000,
        }
    }

    #[test]
    fn volume_surge_requires_uptrend_and_threshold() {
        let rows = vec![
            row("005930", 100.0, 110.0, 2_000_000.0, 1_000_000.0),
            row("000660", 100.0, 95.0, 2_000_000.0, 1_000_000.0),
        ];
        let candidates = detect_volume_surge(&rows);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].row.ticker.as_str(), "005930");
    }

    #[test]
    fn composite_selects_top_three() {
        let rows: Vec<UniverseRow> = (0..5)
            .map(|i| row("005930", 100.0, 100.0 + i as f64 * 5.0, 2_000_000.0 + i as f64 * 500_000.0, 1_000_000.0))
            .collect();
        let candidates = detect_volume_surge(&rows);
        assert!(candidates.len() <= 3);
    }

    #[test]
    fn pre_surge_requires_ratio_and_flat_change() {
        assert!(detect_pre_surge(4_000_000.0, 1_000_000.0, 1.0).is_some());
        assert!(detect_pre_surge(4_000_000.0, 1_000_000.0, 5.0).is_none());
        assert!(detect_pre_surge(1_000_000.0, 1_000_000.0, 1.0).is_none());
    }

    #[tokio::test]
    async fn run_session_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let rows = vec![row("005930", 100.0, 110.0, 2_000_000.0, 1_000_000.0)];
        run_session(&store, date, Session::Morning, rows.clone(), None).await.unwrap();
        run_session(&store, date, Session::Morning, rows, None).await.unwrap();
        let count = store.trigger_results_count(date, Session::Morning).unwrap();
        assert_eq!(count, 1);
    }
}
