//! Realtime Poller (C5): keeps `RealtimePrice` warm for the filtered
//! universe, batched at 30 tickers/call, 2 calls/sec.
//!
//! One long-running `tokio::task`, translated from the original
//! `poll_forever` loop into Rust idiom: a `loop { ... }` with
//! `tokio::time::sleep` suspension points rather than `asyncio.sleep`.

use crate::error::AppResult;
use crate::gateway::MarketDataGateway;
use crate::models::{MarketStatus, RealtimePrice, Ticker};
use crate::store::Store;
use chrono::{Datelike, NaiveTime, Timelike, Utc, Weekday};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const BATCH_SIZE: usize = 30;
pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Prep,
    PreMarketOffHours,
    OpeningCallAuction,
    Regular,
    ClosingCallAuction,
    PostCloseOffHours,
    SinglePriceAfterHours,
    Closed,
}

impl SessionPhase {
    pub fn is_call_auction(&self) -> bool {
        matches!(self, SessionPhase::OpeningCallAuction | SessionPhase::ClosingCallAuction)
    }

    pub fn market_status(&self) -> MarketStatus {
        match self {
            SessionPhase::Prep | SessionPhase::PreMarketOffHours | SessionPhase::OpeningCallAuction => {
                MarketStatus::PreMarket
            }
            SessionPhase::Regular | SessionPhase::ClosingCallAuction => MarketStatus::Open,
            SessionPhase::PostCloseOffHours | SessionPhase::SinglePriceAfterHours => MarketStatus::AfterHours,
            SessionPhase::Closed => MarketStatus::Closed,
        }
    }
}

/// Pure resolver, unit-tested at every boundary minute.
pub fn resolve_phase(now: NaiveTime, weekday: Weekday) -> SessionPhase {
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return SessionPhase::Closed;
    }
    let t = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    if now >= t(7, 30) && now < t(8, 30) {
        SessionPhase::Prep
    } else if now >= t(8, 30) && now < t(8, 40) {
        SessionPhase::PreMarketOffHours
    } else if now >= t(8, 40) && now < t(9, 0) {
        SessionPhase::OpeningCallAuction
    } else if now >= t(9, 0) && now < t(15, 20) {
        SessionPhase::Regular
    } else if now >= t(15, 20) && now < t(15, 30) {
        SessionPhase::ClosingCallAuction
    } else if now >= t(15, 30) && now < t(16, 0) {
        SessionPhase::PostCloseOffHours
    } else if now >= t(16, 0) && now < t(18, 0) {
        SessionPhase::SinglePriceAfterHours
    } else {
        SessionPhase::Closed
    }
}

pub struct Poller {
    store: Arc<Store>,
    gateway: Arc<dyn MarketDataGateway>,
    stop: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(store: Arc<Store>, gateway: Arc<dyn MarketDataGateway>, stop: Arc<AtomicBool>) -> Self {
        Self { store, gateway, stop }
    }

    pub async fn run(&self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("poller observed stop flag, exiting");
                return;
            }

            let now = Utc::now();
            let phase = resolve_phase(now.time(), now.weekday());

            if phase == SessionPhase::Closed {
                let sleep_for = seconds_until_next_prep(now.time());
                tokio::time::sleep(Duration::from_secs(sleep_for.min(300))).await;
                continue;
            }

            let universe = match self.store.filtered_tickers_passing() {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "failed to load filtered universe, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let mut errors = 0u32;
            for batch in universe.chunks(BATCH_SIZE) {
                if self.stop.load(Ordering::Relaxed) {
                    info!("poller observed stop flag mid-batch, exiting");
                    return;
                }
                if let Err(e) = self.poll_batch(batch, phase).await {
                    warn!(error = %e, "batch poll failed");
                    errors += 1;
                }
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
            if errors > 0 {
                warn!(errors, "poller completed cycle with batch errors");
            }
        }
    }

    async fn poll_batch(&self, tickers: &[Ticker], phase: SessionPhase) -> AppResult<()> {
        let quotes = self.gateway.realtime_bulk(tickers, 300).await?;
        let now = Utc::now();
        for ticker in tickers {
            let Some(quote) = quotes.get(ticker) else { continue };

            let (current, change_rate, change_amount, volume) =
                if phase.is_call_auction() && quote.expected_diff != 0 && quote.prev_close > 0 {
                    let change_rate = if quote.expected_change_rate != 0.0 {
                        quote.expected_change_rate
                    } else {
                        quote.change_rate
                    };
                    let volume = if quote.expected_volume > 0 { quote.expected_volume } else { quote.volume };
                    (quote.prev_close + quote.expected_diff, change_rate, quote.expected_diff, volume)
                } else {
                    (quote.current, quote.change_rate, quote.change_amount, quote.volume)
                };

            let price = RealtimePrice {
                ticker: ticker.clone(),
                current,
                change_rate,
                change_amount,
                volume,
                open: quote.open,
                high: quote.high,
                low: quote.low,
                trading_value: quote.trading_value,
                market_status: phase.market_status(),
                data_source: "vendor".to_string(),
                updated_at: now,
            };
            if let Err(e) = self.store.upsert_realtime_price(&price) {
                warn!(ticker = %ticker, error = %e, "failed to persist realtime price");
            }
        }
        Ok(())
    }
}

fn seconds_until_next_prep(now: NaiveTime) -> u64 {
    let prep = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
    if now < prep {
        (prep - now).num_seconds().max(1) as u64
    } else {
        let midnight = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        ((midnight - now).num_seconds() + prep.num_seconds_from_midnight() as i64 + 1).max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn resolves_every_documented_window() {
        assert_eq!(resolve_phase(t(7, 30), Weekday::Mon), SessionPhase::Prep);
        assert_eq!(resolve_phase(t(8, 29), Weekday::Mon), SessionPhase::Prep);
        assert_eq!(resolve_phase(t(8, 30), Weekday::Mon), SessionPhase::PreMarketOffHours);
        assert_eq!(resolve_phase(t(8, 40), Weekday::Mon), SessionPhase::OpeningCallAuction);
        assert_eq!(resolve_phase(t(9, 0), Weekday::Mon), SessionPhase::Regular);
        assert_eq!(resolve_phase(t(15, 20), Weekday::Mon), SessionPhase::ClosingCallAuction);
        assert_eq!(resolve_phase(t(15, 30), Weekday::Mon), SessionPhase::PostCloseOffHours);
        assert_eq!(resolve_phase(t(16, 0), Weekday::Mon), SessionPhase::SinglePriceAfterHours);
        assert_eq!(resolve_phase(t(18, 0), Weekday::Mon), SessionPhase::Closed);
        assert_eq!(resolve_phase(t(3, 0), Weekday::Mon), SessionPhase::Closed);
    }

    #[test]
    fn weekends_are_always_closed() {
        assert_eq!(resolve_phase(t(10, 0), Weekday::Sat), SessionPhase::Closed);
        assert_eq!(resolve_phase(t(10, 0), Weekday::Sun), SessionPhase::Closed);
    }

    #[test]
    fn call_auction_is_recognized() {
        assert!(resolve_phase(t(8, 45), Weekday::Tue).is_call_auction());
        assert!(resolve_phase(t(15, 25), Weekday::Tue).is_call_auction());
        assert!(!resolve_phase(t(10, 0), Weekday::Tue).is_call_auction());
    }
}
