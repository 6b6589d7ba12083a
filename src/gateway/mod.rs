//! Market Data Gateway (C2): uniform async access to snapshots, history,
//! index/macro data, fundamentals, news, and derived technicals.
//!
//! One trait so the rest of the system never depends on the vendor wire
//! format directly, mirroring the way the teacher's scrapers each hide a
//! vendor behind a narrow set of async functions (`scrapers::polymarket_gamma`,
//! `scrapers::dome_rest`).

pub mod news;
pub mod retry;
pub mod vendor;

use crate::error::{AppError, AppResult};
use crate::models::{MarketIndex, MarketSnapshotRow, NewsItem, PriceBar, Technicals, Ticker};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Fundamentals {
    pub ticker: Ticker,
    pub per: f64,
    pub pbr: f64,
    pub roe: f64,
    pub eps: f64,
    pub bps: f64,
    pub debt_ratio: f64,
    pub revenue_growth_yoy: f64,
}

#[derive(Debug, Clone)]
pub struct RealtimeQuote {
    pub ticker: Ticker,
    pub current: i64,
    pub change_rate: f64,
    pub change_amount: i64,
    pub volume: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub trading_value: i64,
    /// Previous close, only meaningful during a call auction.
    pub prev_close: i64,
    /// Vendor-projected diff off `prev_close` during a call auction.
    pub expected_diff: i64,
    pub expected_change_rate: f64,
    pub expected_volume: i64,
}

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn snapshot(&self, date: NaiveDate) -> AppResult<HashMap<Ticker, MarketSnapshotRow>>;

    async fn history(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<PriceBar>>;

    async fn index(&self, date: NaiveDate) -> AppResult<MarketIndex>;

    /// Skips weekends and dates whose probe snapshot is empty or whose
    /// close-sum and volume-sum are both zero. Bounded to `max_lookback`
    /// steps; exceeding the bound is `DataUnavailable`.
    async fn previous_trading_day(
        &self,
        date: NaiveDate,
        max_lookback: u32,
    ) -> AppResult<NaiveDate>;

    async fn fundamentals(&self, ticker: &Ticker) -> AppResult<Fundamentals>;

    /// Concatenates finance-portal HTML and news RSS with no dedup, newest
    /// first, windowed to the last `days` days.
    async fn news(&self, ticker: &Ticker, days: i64) -> AppResult<Vec<NewsItem>>;

    async fn technicals(&self, ticker: &Ticker, date: NaiveDate) -> AppResult<Technicals>;

    async fn technicals_batch(
        &self,
        tickers: &[Ticker],
        date: NaiveDate,
        batch_size: usize,
    ) -> AppResult<HashMap<Ticker, Technicals>>;

    async fn atr(&self, ticker: &Ticker, date: NaiveDate, period: usize) -> AppResult<Option<f64>>;

    async fn realtime_one(&self, ticker: &Ticker) -> AppResult<RealtimeQuote>;

    async fn realtime_bulk(
        &self,
        tickers: &[Ticker],
        staleness_sec: i64,
    ) -> AppResult<HashMap<Ticker, RealtimeQuote>>;
}

/// Shared helper: walk backward from `date` applying `is_valid`, bounded by
/// `max_lookback`. Used by [`vendor::VendorGateway::previous_trading_day`]
/// and available to any other `MarketDataGateway` implementation (including
/// test fakes) that needs the same weekend-skipping walk.
pub async fn walk_previous_trading_day<F, Fut>(
    date: NaiveDate,
    max_lookback: u32,
    is_valid: F,
) -> AppResult<NaiveDate>
where
    F: Fn(NaiveDate) -> Fut,
    Fut: std::future::Future<Output = AppResult<bool>>,
{
    let mut cursor = date;
    for _ in 0..max_lookback {
        cursor = cursor.pred_opt().ok_or_else(|| AppError::data_unavailable("date underflow"))?;
        use chrono::Datelike;
        if matches!(cursor.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            continue;
        }
        if is_valid(cursor).await? {
            return Ok(cursor);
        }
    }
    Err(AppError::data_unavailable(format!(
        "no valid trading day found within {max_lookback} days before {date}"
    )))
}
