//! End-to-end pass over the morning trigger pipeline: a filtered universe
//! persisted to a real (in-memory) store, joined against a fake gateway's
//! snapshots via `assemble_universe`, fed through `run_session`, and read
//! back — the same path `dispatch_job`/`run_trigger_session` in `main.rs`
//! drives, minus the HTTP/scheduler plumbing around it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use surge_backend::error::{AppError, AppResult};
use surge_backend::gateway::{walk_previous_trading_day, Fundamentals, MarketDataGateway, RealtimeQuote};
use surge_backend::models::{
    FilterStatus, FilteredStock, Market, MarketIndex, MarketSnapshotRow, NewsItem, PriceBar,
    Session, Technicals, Ticker,
};
use surge_backend::store::Store;
use surge_backend::triggers::{assemble_universe, run_session};

struct FakeGateway {
    snapshots: HashMap<NaiveDate, HashMap<Ticker, MarketSnapshotRow>>,
}

fn row(close: f64, volume: f64, market_cap: i64) -> MarketSnapshotRow {
    MarketSnapshotRow {
        ticker: Ticker::try_from("005930").unwrap(),
        open: close * 0.97,
        high: close * 1.01,
        low: close * 0.96,
        close,
        volume,
        change_rate: 3.0,
        market_cap,
        listed_shares: 100_000_000,
        trading_value: close * volume,
    }
}

#[async_trait]
impl MarketDataGateway for FakeGateway {
    async fn snapshot(&self, date: NaiveDate) -> AppResult<HashMap<Ticker, MarketSnapshotRow>> {
        Ok(self.snapshots.get(&date).cloned().unwrap_or_default())
    }

    async fn history(&self, _ticker: &Ticker, _start: NaiveDate, end: NaiveDate) -> AppResult<Vec<PriceBar>> {
        Ok((0..5)
            .map(|i| PriceBar {
                date: end - Duration::days(i),
                open: 69_000.0,
                high: 70_500.0,
                low: 68_500.0,
                close: 70_000.0,
                volume: 1_000_000.0,
            })
            .collect())
    }

    async fn index(&self, date: NaiveDate) -> AppResult<MarketIndex> {
        Ok(MarketIndex {
            date,
            kospi_close: 2600.0,
            kospi_change_pct: 0.5,
            kospi_change_pts: 13.0,
            kosdaq_close: 850.0,
            kosdaq_change_pct: 0.3,
            kosdaq_change_pts: 2.5,
            kospi_trading_value: 10_000_000_000_000,
            kosdaq_trading_value: 5_000_000_000_000,
            kospi_net_flow: Default::default(),
            kosdaq_net_flow: Default::default(),
            advancers: 500,
            decliners: 300,
            unchanged: 50,
        })
    }

    async fn previous_trading_day(&self, date: NaiveDate, max_lookback: u32) -> AppResult<NaiveDate> {
        let snapshots = &self.snapshots;
        walk_previous_trading_day(date, max_lookback, |cursor| {
            let has_data = snapshots.contains_key(&cursor);
            async move { Ok(has_data) }
        })
        .await
    }

    async fn fundamentals(&self, ticker: &Ticker) -> AppResult<Fundamentals> {
        Ok(Fundamentals {
            ticker: ticker.clone(),
            per: 12.0,
            pbr: 1.3,
            roe: 14.0,
            eps: 5800.0,
            bps: 53_000.0,
            debt_ratio: 35.0,
            revenue_growth_yoy: 9.0,
        })
    }

    async fn news(&self, _ticker: &Ticker, _days: i64) -> AppResult<Vec<NewsItem>> {
        Ok(Vec::new())
    }

    async fn technicals(&self, _ticker: &Ticker, _date: NaiveDate) -> AppResult<Technicals> {
        Ok(Technicals::default())
    }

    async fn technicals_batch(
        &self,
        _tickers: &[Ticker],
        _date: NaiveDate,
        _batch_size: usize,
    ) -> AppResult<HashMap<Ticker, Technicals>> {
        Ok(HashMap::new())
    }

    async fn atr(&self, _ticker: &Ticker, _date: NaiveDate, _period: usize) -> AppResult<Option<f64>> {
        Ok(None)
    }

    async fn realtime_one(&self, ticker: &Ticker) -> AppResult<RealtimeQuote> {
        Err(AppError::data_unavailable(format!("no realtime quote for {ticker}")))
    }

    async fn realtime_bulk(
        &self,
        _tickers: &[Ticker],
        _staleness_sec: i64,
    ) -> AppResult<HashMap<Ticker, RealtimeQuote>> {
        Ok(HashMap::new())
    }
}

fn sample_filtered_stock() -> FilteredStock {
    FilteredStock {
        ticker: Ticker::try_from("005930").unwrap(),
        name: "Samsung Electronics".into(),
        market: Market::Kospi,
        bps: 53_000.0,
        per: 12.0,
        pbr: 1.3,
        eps: 5800.0,
        div: 2.0,
        dps: 1400.0,
        roe: 14.0,
        debt_ratio: 35.0,
        revenue_growth_yoy: 9.0,
        market_cap: 400_000_000_000_000,
        trading_value: 1_000_000_000_000,
        filter_status: FilterStatus::Pass,
        last_filter_check: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn morning_session_round_trip_through_assemble_and_persist() {
    let store = Store::open_in_memory().unwrap();
    store.upsert_filtered_stock(&sample_filtered_stock()).unwrap();

    let today = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let yesterday = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();

    let mut snapshots = HashMap::new();
    snapshots.insert(yesterday, HashMap::from([(Ticker::try_from("005930").unwrap(), row(68_000.0, 900_000.0, 400_000_000_000_000))]));
    snapshots.insert(today, HashMap::from([(Ticker::try_from("005930").unwrap(), row(71_000.0, 2_500_000.0, 400_000_000_000_000))]));
    let gateway: Arc<dyn MarketDataGateway> = Arc::new(FakeGateway { snapshots });

    let universe = assemble_universe(&store, &gateway, today).await.unwrap();
    assert_eq!(universe.len(), 1);
    assert_eq!(universe[0].name, "Samsung Electronics");
    assert!(universe[0].is_uptrend());
    assert!(universe[0].volume_change_pct() > 30.0);

    let by_type = run_session(&store, today, Session::Morning, universe, None).await.unwrap();
    assert!(!by_type.is_empty());

    let persisted = store.trigger_results_for(today, Session::Morning).unwrap();
    assert!(!persisted.is_empty());
    assert!(persisted.iter().any(|r| r.ticker.as_str() == "005930" && r.name == "Samsung Electronics"));
}

#[tokio::test]
async fn rerunning_the_same_session_does_not_duplicate_rows() {
    let store = Store::open_in_memory().unwrap();
    store.upsert_filtered_stock(&sample_filtered_stock()).unwrap();

    let today = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let yesterday = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
    let mut snapshots = HashMap::new();
    snapshots.insert(yesterday, HashMap::from([(Ticker::try_from("005930").unwrap(), row(68_000.0, 900_000.0, 400_000_000_000_000))]));
    snapshots.insert(today, HashMap::from([(Ticker::try_from("005930").unwrap(), row(71_000.0, 2_500_000.0, 400_000_000_000_000))]));
    let gateway: Arc<dyn MarketDataGateway> = Arc::new(FakeGateway { snapshots });

    let universe = assemble_universe(&store, &gateway, today).await.unwrap();
    let first_count = run_session(&store, today, Session::Morning, universe.clone(), None)
        .await
        .unwrap()
        .values()
        .map(|v| v.len())
        .sum::<usize>();
    run_session(&store, today, Session::Morning, universe, None).await.unwrap();

    let total: i64 = store.trigger_results_count(today, Session::Morning).unwrap();
    assert_eq!(total as usize, first_count);
}

#[tokio::test]
async fn previous_trading_day_skips_weekend_and_empty_snapshots() {
    // Saturday 2026-08-01 and Sunday 2026-08-02 have no entries at all (they
    // aren't in the map), and Friday 2026-07-31 is deliberately left absent
    // too, so the walk must skip all three and land on Thursday 2026-07-30.
    let monday = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
    let thursday = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();

    let mut snapshots = HashMap::new();
    snapshots.insert(thursday, HashMap::from([(Ticker::try_from("005930").unwrap(), row(70_000.0, 1_000_000.0, 400_000_000_000_000))]));
    let gateway = FakeGateway { snapshots };

    let resolved = gateway.previous_trading_day(monday, 10).await.unwrap();
    assert_eq!(resolved, thursday);
}

#[tokio::test]
async fn previous_trading_day_errors_past_lookback_bound() {
    let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let gateway = FakeGateway { snapshots: HashMap::new() };
    let result = gateway.previous_trading_day(date, 3).await;
    assert!(result.is_err());
}
