//! Core data model shared by every component.
//!
//! Kept in one flat file the way the teacher keeps `Signal`/`SignalType`/
//! `Config` together — the entity count here is still small enough that
//! splitting by module would cost more than it buys.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 6-character zero-padded numeric ticker. Immutable identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Ticker {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(value.to_string()))
        } else {
            Err(format!("invalid ticker: {value}"))
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Kospi,
    Kosdaq,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStatus {
    Pass,
    Fail,
    Unknown,
}

impl FilterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStatus::Pass => "pass",
            FilterStatus::Fail => "fail",
            FilterStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    PreMarket,
    Open,
    Closed,
    AfterHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Morning => "morning",
            Session::Afternoon => "afternoon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    VolumeSurge,
    GapUp,
    FundInflow,
    IntradayRise,
    ClosingStrength,
    SidewaysVolume,
    PreSurge,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::VolumeSurge => "volume_surge",
            TriggerType::GapUp => "gap_up",
            TriggerType::FundInflow => "fund_inflow",
            TriggerType::IntradayRise => "intraday_rise",
            TriggerType::ClosingStrength => "closing_strength",
            TriggerType::SidewaysVolume => "sideways_volume",
            TriggerType::PreSurge => "pre_surge",
        }
    }

    pub fn session(&self) -> Session {
        match self {
            TriggerType::VolumeSurge | TriggerType::GapUp | TriggerType::FundInflow => {
                Session::Morning
            }
            _ => Session::Afternoon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Morning,
    Afternoon,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Morning => "morning",
            ReportType::Afternoon => "afternoon",
        }
    }
}

/// Produced by the external daily batch; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredStock {
    pub ticker: Ticker,
    pub name: String,
    pub market: Market,
    pub bps: f64,
    pub per: f64,
    pub pbr: f64,
    pub eps: f64,
    pub div: f64,
    pub dps: f64,
    pub roe: f64,
    pub debt_ratio: f64,
    pub revenue_growth_yoy: f64,
    pub market_cap: i64,
    pub trading_value: i64,
    pub filter_status: FilterStatus,
    pub last_filter_check: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Written by the realtime poller every polling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimePrice {
    pub ticker: Ticker,
    pub current: i64,
    pub change_rate: f64,
    pub change_amount: i64,
    pub volume: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub trading_value: i64,
    pub market_status: MarketStatus,
    pub data_source: String,
    pub updated_at: DateTime<Utc>,
}

impl RealtimePrice {
    /// Strict staleness threshold for batch consumers.
    pub const BATCH_STALENESS_SECS: i64 = 5 * 60;
    /// Staleness threshold accepted as a trigger-engine fallback.
    pub const TRIGGER_FALLBACK_STALENESS_SECS: i64 = 24 * 60 * 60;

    pub fn is_fresh(&self, now: DateTime<Utc>, staleness_secs: i64) -> bool {
        (now - self.updated_at).num_seconds() <= staleness_secs
    }

    /// Current_price = 0 rows are never emitted to consumers as live quotes.
    pub fn is_live(&self) -> bool {
        self.current != 0
    }
}

/// Immutable once observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Per-ticker OHLCV + change% + market cap + listed shares at one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshotRow {
    pub ticker: Ticker,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub change_rate: f64,
    pub market_cap: i64,
    pub listed_shares: i64,
    /// Cumulative trading value (KRW turnover), not share count.
    pub trading_value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NetFlow {
    pub foreign: i64,
    pub institution: i64,
    pub individual: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketIndex {
    pub date: NaiveDate,
    pub kospi_close: f64,
    pub kospi_change_pct: f64,
    pub kospi_change_pts: f64,
    pub kosdaq_close: f64,
    pub kosdaq_change_pct: f64,
    pub kosdaq_change_pts: f64,
    pub kospi_trading_value: i64,
    pub kosdaq_trading_value: i64,
    pub kospi_net_flow: NetFlow,
    pub kosdaq_net_flow: NetFlow,
    pub advancers: i32,
    pub decliners: i32,
    pub unchanged: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResult {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub session: Session,
    pub ticker: Ticker,
    pub trigger_type: TriggerType,
    pub name: String,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
    pub trading_value: i64,
    pub composite_score: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ticker: Ticker,
    pub date: NaiveDate,
    pub payload: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResult {
    pub report_type: ReportType,
    pub date: NaiveDate,
    pub payload: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub ticker: Ticker,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Technicals {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub macd_status: MacdStatus,
    pub sma5: f64,
    pub sma20: f64,
    pub sma60: f64,
    pub ma_position: MaPosition,
}

impl Default for Technicals {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            macd_status: MacdStatus::Neutral,
            sma5: 0.0,
            sma20: 0.0,
            sma60: 0.0,
            ma_position: MaPosition::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdStatus {
    GoldenCross,
    DeadCross,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaPosition {
    #[serde(rename = "상회")]
    Above,
    #[serde(rename = "하회")]
    Below,
    #[serde(rename = "중립")]
    Neutral,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_requires_six_digits() {
        assert!(Ticker::try_from("005930").is_ok());
        assert!(Ticker::try_from("5930").is_err());
        assert!(Ticker::try_from("00593A").is_err());
    }

    #[test]
    fn realtime_price_zero_is_not_live() {
        let p = RealtimePrice {
            ticker: Ticker::try_from("005930").unwrap(),
            current: 0,
            change_rate: 0.0,
            change_amount: 0,
            volume: 0,
            open: 0,
            high: 0,
            low: 0,
            trading_value: 0,
            market_status: MarketStatus::Closed,
            data_source: "vendor".into(),
            updated_at: Utc::now(),
        };
        assert!(!p.is_live());
    }
}
