//! Store (C1): single embedded transactional store.
//!
//! Pragmas force WAL mode and a 30s busy timeout, the same way the teacher's
//! `DbSignalStorage` opens its connection. Every logical unit of work is a
//! [`Session`] guard over a SQL transaction: commit on clean exit, rollback
//! on error — the Rust stand-in for the original's `with get_db() as db:`
//! context manager.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::models::{
    AnalysisResult, FilterStatus, FilteredStock, Market, MarketStatus, RealtimePrice,
    ReportResult, ReportType, Session as MarketSession, Ticker, TriggerResult, TriggerType,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 30000;

CREATE TABLE IF NOT EXISTS filtered_stocks (
    ticker TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    market TEXT NOT NULL,
    bps REAL NOT NULL DEFAULT 0,
    per REAL NOT NULL DEFAULT 0,
    pbr REAL NOT NULL DEFAULT 0,
    eps REAL NOT NULL DEFAULT 0,
    div REAL NOT NULL DEFAULT 0,
    dps REAL NOT NULL DEFAULT 0,
    roe REAL NOT NULL DEFAULT 0,
    debt_ratio REAL NOT NULL DEFAULT 0,
    revenue_growth_yoy REAL NOT NULL DEFAULT 0,
    market_cap INTEGER NOT NULL DEFAULT 0,
    trading_value INTEGER NOT NULL DEFAULT 0,
    filter_status TEXT NOT NULL DEFAULT 'unknown',
    last_filter_check TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS realtime_prices (
    ticker TEXT PRIMARY KEY,
    current INTEGER NOT NULL,
    change_rate REAL NOT NULL,
    change_amount INTEGER NOT NULL,
    volume INTEGER NOT NULL,
    open INTEGER NOT NULL,
    high INTEGER NOT NULL,
    low INTEGER NOT NULL,
    trading_value INTEGER NOT NULL,
    market_status TEXT NOT NULL,
    data_source TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS price_bars (
    ticker TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (ticker, date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS trigger_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    session TEXT NOT NULL,
    ticker TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    name TEXT NOT NULL,
    price INTEGER NOT NULL,
    change_rate REAL NOT NULL,
    volume INTEGER NOT NULL,
    trading_value INTEGER NOT NULL,
    composite_score REAL NOT NULL,
    detected_at TEXT NOT NULL,
    UNIQUE(date, session, ticker, trigger_type)
);

CREATE INDEX IF NOT EXISTS idx_trigger_results_lookup
    ON trigger_results(date, session, trigger_type);

CREATE TABLE IF NOT EXISTS analysis_results (
    ticker TEXT NOT NULL,
    date TEXT NOT NULL,
    payload TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    model TEXT NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (ticker, date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS report_results (
    report_type TEXT NOT NULL,
    date TEXT NOT NULL,
    payload TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    model TEXT NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (report_type, date)
) WITHOUT ROWID;
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

/// A scoped unit of work. Commits on `commit()`; rolls back if dropped
/// without having been committed (e.g. on an early `?` return).
pub struct StoreSession<'a> {
    txn: Option<rusqlite::Transaction<'a>>,
}

impl<'a> StoreSession<'a> {
    pub fn raw(&self) -> &rusqlite::Transaction<'a> {
        self.txn.as_ref().expect("session used after commit")
    }

    pub fn commit(mut self) -> Result<()> {
        self.txn.take().unwrap().commit().context("commit failed")
    }
}

impl Store {
    pub fn open(path: &str) -> Result<Arc<Self>> {
        let conn = Connection::open(path).context("open sqlite database")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    pub fn open_in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// Run `f` inside a transaction; rolls back automatically if `f` errors
    /// or if the session is dropped without `commit()`.
    pub fn with_session<T>(&self, f: impl FnOnce(&StoreSession) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let txn = guard.transaction().context("begin transaction")?;
        let session = StoreSession { txn: Some(txn) };
        let result = f(&session);
        match result {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    // ---- filtered_stocks ----

    pub fn upsert_filtered_stock(&self, stock: &FilteredStock) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "INSERT INTO filtered_stocks
                 (ticker, name, market, bps, per, pbr, eps, div, dps, roe, debt_ratio,
                  revenue_growth_yoy, market_cap, trading_value, filter_status,
                  last_filter_check, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                 ON CONFLICT(ticker) DO UPDATE SET
                    name=excluded.name, market=excluded.market, bps=excluded.bps,
                    per=excluded.per, pbr=excluded.pbr, eps=excluded.eps, div=excluded.div,
                    dps=excluded.dps, roe=excluded.roe, debt_ratio=excluded.debt_ratio,
                    revenue_growth_yoy=excluded.revenue_growth_yoy,
                    market_cap=excluded.market_cap, trading_value=excluded.trading_value,
                    filter_status=excluded.filter_status,
                    last_filter_check=excluded.last_filter_check, updated_at=excluded.updated_at",
                params![
                    stock.ticker.as_str(),
                    stock.name,
                    market_str(stock.market),
                    stock.bps,
                    stock.per,
                    stock.pbr,
                    stock.eps,
                    stock.div,
                    stock.dps,
                    stock.roe,
                    stock.debt_ratio,
                    stock.revenue_growth_yoy,
                    stock.market_cap,
                    stock.trading_value,
                    stock.filter_status.as_str(),
                    stock.last_filter_check.to_rfc3339(),
                    stock.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn filtered_tickers_passing(&self) -> Result<Vec<Ticker>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT ticker FROM filtered_stocks WHERE filter_status = 'pass'")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Ticker::try_from(row?.as_str()).map_err(anyhow::Error::msg)?);
        }
        Ok(out)
    }

    /// Looks up one ticker's stored fundamentals regardless of filter
    /// status — used by the "static fundamentals" stock-info endpoint,
    /// which should resolve any known ticker, not just ones currently
    /// passing the filter.
    pub fn filtered_stock(&self, ticker: &Ticker) -> Result<Option<FilteredStock>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT ticker, name, market, bps, per, pbr, eps, div, dps, roe, debt_ratio,
                    revenue_growth_yoy, market_cap, trading_value, filter_status,
                    last_filter_check, updated_at
             FROM filtered_stocks WHERE ticker = ?1",
            params![ticker.as_str()],
            row_to_filtered_stock,
        )
        .optional()
        .context("query filtered stock")
    }

    pub fn filtered_stocks_passing(&self) -> Result<Vec<FilteredStock>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ticker, name, market, bps, per, pbr, eps, div, dps, roe, debt_ratio,
                    revenue_growth_yoy, market_cap, trading_value, filter_status,
                    last_filter_check, updated_at
             FROM filtered_stocks WHERE filter_status = 'pass'",
        )?;
        let rows = stmt.query_map([], row_to_filtered_stock)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("read filtered stocks")
    }

    pub fn latest_filtered_stock_update(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row("SELECT MAX(updated_at) FROM filtered_stocks", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(value.and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok().map(|d| d.with_timezone(&Utc))))
    }

    // ---- realtime_prices ----

    pub fn upsert_realtime_price(&self, price: &RealtimePrice) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "INSERT INTO realtime_prices
                 (ticker, current, change_rate, change_amount, volume, open, high, low,
                  trading_value, market_status, data_source, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                 ON CONFLICT(ticker) DO UPDATE SET
                    current=excluded.current, change_rate=excluded.change_rate,
                    change_amount=excluded.change_amount, volume=excluded.volume,
                    open=excluded.open, high=excluded.high, low=excluded.low,
                    trading_value=excluded.trading_value, market_status=excluded.market_status,
                    data_source=excluded.data_source, updated_at=excluded.updated_at",
                params![
                    price.ticker.as_str(),
                    price.current,
                    price.change_rate,
                    price.change_amount,
                    price.volume,
                    price.open,
                    price.high,
                    price.low,
                    price.trading_value,
                    market_status_str(price.market_status),
                    price.data_source,
                    price.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn realtime_price(&self, ticker: &Ticker) -> Result<Option<RealtimePrice>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT ticker, current, change_rate, change_amount, volume, open, high, low,
                    trading_value, market_status, data_source, updated_at
             FROM realtime_prices WHERE ticker = ?1",
            params![ticker.as_str()],
            row_to_realtime_price,
        )
        .optional()
        .context("query realtime price")
    }

    pub fn realtime_prices_bulk(&self, tickers: &[Ticker]) -> Result<Vec<RealtimePrice>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for ticker in tickers {
            if let Some(row) = conn
                .query_row(
                    "SELECT ticker, current, change_rate, change_amount, volume, open, high, low,
                            trading_value, market_status, data_source, updated_at
                     FROM realtime_prices WHERE ticker = ?1",
                    params![ticker.as_str()],
                    row_to_realtime_price,
                )
                .optional()?
            {
                out.push(row);
            }
        }
        Ok(out)
    }

    // ---- trigger_results ----

    /// Atomically replaces the (date, session) row set: delete-then-insert
    /// inside one transaction, so a re-run is idempotent.
    pub fn replace_trigger_results(
        &self,
        date: NaiveDate,
        session: MarketSession,
        results: &[TriggerResult],
    ) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "DELETE FROM trigger_results WHERE date = ?1 AND session = ?2",
                params![date.to_string(), session.as_str()],
            )?;
            for r in results {
                s.raw().execute(
                    "INSERT INTO trigger_results
                     (date, session, ticker, trigger_type, name, price, change_rate, volume,
                      trading_value, composite_score, detected_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                    params![
                        r.date.to_string(),
                        r.session.as_str(),
                        r.ticker.as_str(),
                        r.trigger_type.as_str(),
                        r.name,
                        r.price,
                        r.change_rate,
                        r.volume,
                        r.trading_value,
                        r.composite_score,
                        r.detected_at.to_rfc3339(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn trigger_results_count(&self, date: NaiveDate, session: MarketSession) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM trigger_results WHERE date = ?1 AND session = ?2",
            params![date.to_string(), session.as_str()],
            |r| r.get(0),
        )
        .context("count trigger results")
    }

    pub fn trigger_results_for(
        &self,
        date: NaiveDate,
        session: MarketSession,
    ) -> Result<Vec<TriggerResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, date, session, ticker, trigger_type, name, price, change_rate, volume,
                    trading_value, composite_score, detected_at
             FROM trigger_results WHERE date = ?1 AND session = ?2
             ORDER BY composite_score DESC",
        )?;
        let rows = stmt.query_map(params![date.to_string(), session.as_str()], row_to_trigger)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("read trigger results")
    }

    // ---- analysis_results ----

    pub fn analysis_result(&self, ticker: &Ticker, date: NaiveDate) -> Result<Option<AnalysisResult>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT ticker, date, payload, generated_at, model, tokens_used
             FROM analysis_results WHERE ticker = ?1 AND date = ?2",
            params![ticker.as_str(), date.to_string()],
            row_to_analysis,
        )
        .optional()
        .context("query analysis result")
    }

    pub fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "INSERT INTO analysis_results (ticker, date, payload, generated_at, model, tokens_used)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(ticker, date) DO UPDATE SET
                    payload=excluded.payload, generated_at=excluded.generated_at,
                    model=excluded.model, tokens_used=excluded.tokens_used",
                params![
                    result.ticker.as_str(),
                    result.date.to_string(),
                    result.payload.to_string(),
                    result.generated_at.to_rfc3339(),
                    result.model,
                    result.tokens_used,
                ],
            )?;
            Ok(())
        })
    }

    pub fn invalidate_analysis(&self, ticker: &Ticker, date: NaiveDate) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "DELETE FROM analysis_results WHERE ticker = ?1 AND date = ?2",
                params![ticker.as_str(), date.to_string()],
            )?;
            Ok(())
        })
    }

    // ---- report_results ----

    pub fn report_result(&self, report_type: ReportType, date: NaiveDate) -> Result<Option<ReportResult>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT report_type, date, payload, generated_at, model, tokens_used
             FROM report_results WHERE report_type = ?1 AND date = ?2",
            params![report_type.as_str(), date.to_string()],
            row_to_report,
        )
        .optional()
        .context("query report result")
    }

    pub fn upsert_report_result(&self, result: &ReportResult) -> Result<()> {
        self.with_session(|s| {
            s.raw().execute(
                "INSERT INTO report_results (report_type, date, payload, generated_at, model, tokens_used)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(report_type, date) DO UPDATE SET
                    payload=excluded.payload, generated_at=excluded.generated_at,
                    model=excluded.model, tokens_used=excluded.tokens_used",
                params![
                    result.report_type.as_str(),
                    result.date.to_string(),
                    result.payload.to_string(),
                    result.generated_at.to_rfc3339(),
                    result.model,
                    result.tokens_used,
                ],
            )?;
            Ok(())
        })
    }
}

fn market_str(m: Market) -> &'static str {
    match m {
        Market::Kospi => "KOSPI",
        Market::Kosdaq => "KOSDAQ",
        Market::Other => "OTHER",
    }
}

fn market_status_str(m: MarketStatus) -> &'static str {
    match m {
        MarketStatus::PreMarket => "pre_market",
        MarketStatus::Open => "open",
        MarketStatus::Closed => "closed",
        MarketStatus::AfterHours => "after_hours",
    }
}

fn parse_market_status(s: &str) -> MarketStatus {
    match s {
        "pre_market" => MarketStatus::PreMarket,
        "open" => MarketStatus::Open,
        "after_hours" => MarketStatus::AfterHours,
        _ => MarketStatus::Closed,
    }
}

fn parse_market(s: &str) -> Market {
    match s {
        "KOSPI" => Market::Kospi,
        "KOSDAQ" => Market::Kosdaq,
        _ => Market::Other,
    }
}

fn parse_filter_status(s: &str) -> FilterStatus {
    match s {
        "pass" => FilterStatus::Pass,
        "fail" => FilterStatus::Fail,
        _ => FilterStatus::Unknown,
    }
}

fn row_to_filtered_stock(row: &rusqlite::Row) -> rusqlite::Result<FilteredStock> {
    let ticker: String = row.get(0)?;
    let market: String = row.get(2)?;
    let filter_status: String = row.get(14)?;
    let last_filter_check: String = row.get(15)?;
    let updated_at: String = row.get(16)?;
    Ok(FilteredStock {
        ticker: Ticker::try_from(ticker.as_str()).unwrap_or_else(|_| Ticker::try_from("000000").unwrap()),
        name: row.get(1)?,
        market: parse_market(&market),
        bps: row.get(3)?,
        per: row.get(4)?,
        pbr: row.get(5)?,
        eps: row.get(6)?,
        div: row.get(7)?,
        dps: row.get(8)?,
        roe: row.get(9)?,
        debt_ratio: row.get(10)?,
        revenue_growth_yoy: row.get(11)?,
        market_cap: row.get(12)?,
        trading_value: row.get(13)?,
        filter_status: parse_filter_status(&filter_status),
        last_filter_check: chrono::DateTime::parse_from_rfc3339(&last_filter_check)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_realtime_price(row: &rusqlite::Row) -> rusqlite::Result<RealtimePrice> {
    let ticker: String = row.get(0)?;
    let updated_at: String = row.get(11)?;
    let status: String = row.get(9)?;
    Ok(RealtimePrice {
        ticker: Ticker::try_from(ticker.as_str()).unwrap_or_else(|_| Ticker::try_from("000000").unwrap()),
        current: row.get(1)?,
        change_rate: row.get(2)?,
        change_amount: row.get(3)?,
        volume: row.get(4)?,
        open: row.get(5)?,
        high: row.get(6)?,
        low: row.get(7)?,
        trading_value: row.get(8)?,
        market_status: parse_market_status(&status),
        data_source: row.get(10)?,
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_trigger(row: &rusqlite::Row) -> rusqlite::Result<TriggerResult> {
    let date: String = row.get(1)?;
    let session: String = row.get(2)?;
    let ticker: String = row.get(3)?;
    let trigger_type: String = row.get(4)?;
    let detected_at: String = row.get(11)?;
    Ok(TriggerResult {
        id: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap(),
        session: if session == "morning" {
            MarketSession::Morning
        } else {
            MarketSession::Afternoon
        },
        ticker: Ticker::try_from(ticker.as_str()).unwrap_or_else(|_| Ticker::try_from("000000").unwrap()),
        trigger_type: parse_trigger_type(&trigger_type),
        name: row.get(5)?,
        price: row.get(6)?,
        change_rate: row.get(7)?,
        volume: row.get(8)?,
        trading_value: row.get(9)?,
        composite_score: row.get(10)?,
        detected_at: chrono::DateTime::parse_from_rfc3339(&detected_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn parse_trigger_type(s: &str) -> TriggerType {
    match s {
        "volume_surge" => TriggerType::VolumeSurge,
        "gap_up" => TriggerType::GapUp,
        "fund_inflow" => TriggerType::FundInflow,
        "intraday_rise" => TriggerType::IntradayRise,
        "closing_strength" => TriggerType::ClosingStrength,
        "sideways_volume" => TriggerType::SidewaysVolume,
        _ => TriggerType::PreSurge,
    }
}

fn row_to_analysis(row: &rusqlite::Row) -> rusqlite::Result<AnalysisResult> {
    let ticker: String = row.get(0)?;
    let date: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let generated_at: String = row.get(3)?;
    Ok(AnalysisResult {
        ticker: Ticker::try_from(ticker.as_str()).unwrap_or_else(|_| Ticker::try_from("000000").unwrap()),
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap(),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        generated_at: chrono::DateTime::parse_from_rfc3339(&generated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        model: row.get(4)?,
        tokens_used: row.get(5)?,
    })
}

fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<ReportResult> {
    let report_type: String = row.get(0)?;
    let date: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let generated_at: String = row.get(3)?;
    Ok(ReportResult {
        report_type: if report_type == "morning" {
            ReportType::Morning
        } else {
            ReportType::Afternoon
        },
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap(),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        generated_at: chrono::DateTime::parse_from_rfc3339(&generated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        model: row.get(4)?,
        tokens_used: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilterStatus;
    use chrono::Utc;

    fn sample_stock(ticker: &str, status: FilterStatus) -> FilteredStock {
        FilteredStock {
            ticker: Ticker::try_from(ticker).unwrap(),
            name: "Sample".into(),
            market: Market::Kospi,
            bps: 1000.0,
            per: 10.0,
            pbr: 1.5,
            eps: 500.0,
            div: 1.0,
            dps: 100.0,
            roe: 12.0,
            debt_ratio: 40.0,
            revenue_growth_yoy: 8.0,
            market_cap: 100_000_000_000,
            trading_value: 1_000_000_000,
            filter_status: status,
            last_filter_check: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_is_idempotent_on_unique_key() {
        let store = Store::open_in_memory().unwrap();
        let stock = sample_stock("005930", FilterStatus::Pass);
        store.upsert_filtered_stock(&stock).unwrap();
        store.upsert_filtered_stock(&stock).unwrap();
        let passing = store.filtered_tickers_passing().unwrap();
        assert_eq!(passing.len(), 1);
    }

    #[test]
    fn trigger_replace_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let row = TriggerResult {
            id: None,
            date,
            session: MarketSession::Morning,
            ticker: Ticker::try_from("005930").unwrap(),
            trigger_type: TriggerType::VolumeSurge,
            name: "Sample".into(),
            price: 70000,
            change_rate: 3.2,
            volume: 1_000_000,
            trading_value: 50_000_000_000,
            composite_score: 0.8,
            detected_at: Utc::now(),
        };
        store
            .replace_trigger_results(date, MarketSession::Morning, &[row.clone()])
            .unwrap();
        store
            .replace_trigger_results(date, MarketSession::Morning, &[row])
            .unwrap();
        assert_eq!(store.trigger_results_count(date, MarketSession::Morning).unwrap(), 1);
    }

    #[test]
    fn analysis_cache_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let ticker = Ticker::try_from("005930").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        assert!(store.analysis_result(&ticker, date).unwrap().is_none());

        let result = AnalysisResult {
            ticker: ticker.clone(),
            date,
            payload: serde_json::json!({"opinion": "BUY"}),
            generated_at: Utc::now(),
            model: "test-model".into(),
            tokens_used: 42,
        };
        store.upsert_analysis_result(&result).unwrap();
        assert!(store.analysis_result(&ticker, date).unwrap().is_some());

        store.invalidate_analysis(&ticker, date).unwrap();
        assert!(store.analysis_result(&ticker, date).unwrap().is_none());
    }
}
