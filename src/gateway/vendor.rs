//! `VendorGateway`: the one concrete `MarketDataGateway`, wrapping a
//! `reqwest::Client` against a single brokerage OAuth API, the way the
//! teacher's `PolymarketScraper`/`DomeRest` wrap a client against one
//! upstream with a fixed base URL and key pair.

use super::retry::{retry_with_backoff, BackoffConfig};
use super::{walk_previous_trading_day, Fundamentals, MarketDataGateway, RealtimeQuote};
use crate::error::{AppError, AppResult};
use crate::indicators;
use crate::models::{MarketIndex, MarketSnapshotRow, NetFlow, NewsItem, PriceBar, Technicals, Ticker};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct VendorGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    token: Arc<RwLock<Option<CachedToken>>>,
    last_token_attempt: Arc<RwLock<Option<Instant>>>,
}

impl VendorGateway {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .cookie_store(true)
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            base_url,
            api_key,
            api_secret,
            token: Arc::new(RwLock::new(None)),
            last_token_attempt: Arc::new(RwLock::new(None)),
        }
    }

    fn is_transient(err: &anyhow::Error) -> bool {
        if let Some(status_err) = err.downcast_ref::<reqwest::Error>() {
            if let Some(status) = status_err.status() {
                return status.as_u16() == 429 || status.is_server_error();
            }
            return status_err.is_timeout() || status_err.is_connect();
        }
        err.to_string().to_lowercase().contains("overloaded")
    }

    /// Refreshes 1h before expiry; acquisition is self-rate-limited to
    /// once per minute to survive a flapping upstream without hammering it.
    async fn ensure_token(&self) -> AppResult<String> {
        {
            let guard = self.token.read();
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at - Utc::now() > chrono::Duration::hours(1) {
                    return Ok(cached.token.clone());
                }
            }
        }

        {
            let mut last = self.last_token_attempt.write();
            if let Some(prev) = *last {
                if prev.elapsed() < Duration::from_secs(60) {
                    if let Some(cached) = self.token.read().as_ref() {
                        return Ok(cached.token.clone());
                    }
                    return Err(AppError::transient("token refresh rate-limited, no cached token"));
                }
            }
            *last = Some(Instant::now());
        }

        let response = retry_with_backoff(
            "vendor_token",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .post(format!("{}/oauth2/tokenP", self.base_url))
                    .json(&serde_json::json!({
                        "grant_type": "client_credentials",
                        "appkey": self.api_key,
                        "appsecret": self.api_secret,
                    }))
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("token response malformed: {e}")))?;

        let cached = CachedToken {
            token: parsed.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        };
        *self.token.write() = Some(cached);
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl MarketDataGateway for VendorGateway {
    async fn snapshot(&self, date: NaiveDate) -> AppResult<HashMap<Ticker, MarketSnapshotRow>> {
        let mut lookback = 0;
        let mut cursor = date;
        loop {
            let rows = self.fetch_snapshot_raw(cursor).await?;
            let zero_close = rows.values().filter(|r| r.close == 0.0).count();
            let mostly_zero = !rows.is_empty() && zero_close as f64 / rows.len() as f64 > 0.9;
            if !rows.is_empty() && !mostly_zero {
                return Ok(rows);
            }
            lookback += 1;
            if lookback > 10 {
                return Err(AppError::data_unavailable(format!(
                    "snapshot empty/stale past lookback bound at {date}"
                )));
            }
            cursor = cursor
                .pred_opt()
                .ok_or_else(|| AppError::data_unavailable("date underflow"))?;
        }
    }

    async fn history(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<PriceBar>> {
        let token = self.ensure_token().await?;
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
            self.base_url
        );
        let response = retry_with_backoff(
            "vendor_history",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[
                        ("FID_INPUT_ISCD", ticker.as_str()),
                        ("FID_INPUT_DATE_1", &start.format("%Y%m%d").to_string()),
                        ("FID_INPUT_DATE_2", &end.format("%Y%m%d").to_string()),
                    ])
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize)]
        struct Bar {
            #[serde(rename = "stck_bsop_date")]
            date: String,
            #[serde(rename = "stck_oprc")]
            open: String,
            #[serde(rename = "stck_hgpr")]
            high: String,
            #[serde(rename = "stck_lwpr")]
            low: String,
            #[serde(rename = "stck_clpr")]
            close: String,
            #[serde(rename = "acml_vol")]
            volume: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            output2: Vec<Bar>,
        }
        let parsed: Payload = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("history response malformed: {e}")))?;

        let mut bars: Vec<PriceBar> = parsed
            .output2
            .into_iter()
            .filter_map(|b| {
                Some(PriceBar {
                    date: NaiveDate::parse_from_str(&b.date, "%Y%m%d").ok()?,
                    open: b.open.parse().ok()?,
                    high: b.high.parse().ok()?,
                    low: b.low.parse().ok()?,
                    close: b.close.parse().ok()?,
                    volume: b.volume.parse().ok()?,
                })
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    async fn index(&self, date: NaiveDate) -> AppResult<MarketIndex> {
        // Same vendor host, distinct index endpoint ("0001"=KOSPI,
        // "1001"=KOSDAQ composite codes). Net-flow-by-investor-type and
        // market-wide advancer/decliner breadth live on separate vendor
        // endpoints this gateway doesn't call; left zeroed rather than
        // guessed, matching report-engine's stub-on-failure pattern.
        let (kospi_close, kospi_change_pct, kospi_change_pts, kospi_trading_value) =
            self.fetch_index_raw("0001").await?;
        let (kosdaq_close, kosdaq_change_pct, kosdaq_change_pts, kosdaq_trading_value) =
            self.fetch_index_raw("1001").await?;

        Ok(MarketIndex {
            date,
            kospi_close,
            kospi_change_pct,
            kospi_change_pts,
            kosdaq_close,
            kosdaq_change_pct,
            kosdaq_change_pts,
            kospi_trading_value,
            kosdaq_trading_value,
            kospi_net_flow: NetFlow::default(),
            kosdaq_net_flow: NetFlow::default(),
            advancers: 0,
            decliners: 0,
            unchanged: 0,
        })
    }

    async fn previous_trading_day(&self, date: NaiveDate, max_lookback: u32) -> AppResult<NaiveDate> {
        walk_previous_trading_day(date, max_lookback, |candidate| async move {
            match self.fetch_snapshot_raw(candidate).await {
                Ok(rows) if !rows.is_empty() => {
                    let close_sum: f64 = rows.values().map(|r| r.close).sum();
                    let volume_sum: f64 = rows.values().map(|r| r.volume).sum();
                    Ok(!(close_sum == 0.0 && volume_sum == 0.0))
                }
                Ok(_) => Ok(false),
                Err(AppError::DataUnavailable(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn fundamentals(&self, ticker: &Ticker) -> AppResult<Fundamentals> {
        let token = self.ensure_token().await?;
        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-price", self.base_url);
        let response = retry_with_backoff(
            "vendor_fundamentals",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[("FID_INPUT_ISCD", ticker.as_str())])
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize, Default)]
        struct Output {
            #[serde(default, rename = "per")]
            per: String,
            #[serde(default, rename = "pbr")]
            pbr: String,
            #[serde(default, rename = "eps")]
            eps: String,
            #[serde(default, rename = "bps")]
            bps: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            output: Output,
        }
        let parsed: Payload = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("fundamentals response malformed: {e}")))?;

        Ok(Fundamentals {
            ticker: ticker.clone(),
            per: parsed.output.per.parse().unwrap_or(0.0),
            pbr: parsed.output.pbr.parse().unwrap_or(0.0),
            eps: parsed.output.eps.parse().unwrap_or(0.0),
            bps: parsed.output.bps.parse().unwrap_or(0.0),
            roe: 0.0,
            debt_ratio: 0.0,
            revenue_growth_yoy: 0.0,
        })
    }

    async fn news(&self, ticker: &Ticker, days: i64) -> AppResult<Vec<NewsItem>> {
        super::news::fetch_news(&self.http, ticker, days).await
    }

    async fn technicals(&self, ticker: &Ticker, date: NaiveDate) -> AppResult<Technicals> {
        let start = date - chrono::Duration::days(180);
        let bars = self.history(ticker, start, date).await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(indicators::technicals(&closes))
    }

    async fn technicals_batch(
        &self,
        tickers: &[Ticker],
        date: NaiveDate,
        batch_size: usize,
    ) -> AppResult<HashMap<Ticker, Technicals>> {
        let mut out = HashMap::new();
        for chunk in tickers.chunks(batch_size.max(1)) {
            debug!(chunk_len = chunk.len(), "fetching technicals batch");
            for ticker in chunk {
                match self.technicals(ticker, date).await {
                    Ok(t) => {
                        out.insert(ticker.clone(), t);
                    }
                    Err(e) => {
                        warn!(ticker = %ticker, error = %e, "technicals fetch failed, using neutral default");
                        out.insert(ticker.clone(), Technicals::default());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn atr(&self, ticker: &Ticker, date: NaiveDate, period: usize) -> AppResult<Option<f64>> {
        let start = date - chrono::Duration::days((period as i64 + 10).max(30));
        let bars = self.history(ticker, start, date).await?;
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(indicators::atr(&highs, &lows, &closes, period))
    }

    async fn realtime_one(&self, ticker: &Ticker) -> AppResult<RealtimeQuote> {
        let token = self.ensure_token().await?;
        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-price", self.base_url);
        let response = retry_with_backoff(
            "vendor_realtime",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[("FID_INPUT_ISCD", ticker.as_str())])
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize, Default)]
        struct Output {
            #[serde(default, rename = "stck_prpr")]
            current: String,
            #[serde(default, rename = "prdy_ctrt")]
            change_rate: String,
            #[serde(default, rename = "prdy_vrss")]
            change_amount: String,
            #[serde(default, rename = "acml_vol")]
            volume: String,
            #[serde(default, rename = "stck_oprc")]
            open: String,
            #[serde(default, rename = "stck_hgpr")]
            high: String,
            #[serde(default, rename = "stck_lwpr")]
            low: String,
            #[serde(default, rename = "acml_tr_pbmn")]
            trading_value: String,
            #[serde(default, rename = "inter2_prdy_clpr")]
            prev_close: String,
            #[serde(default, rename = "intr_antc_cntg_vrss")]
            expected_diff: String,
            #[serde(default, rename = "intr_antc_cntg_prdy_ctrt")]
            expected_change_rate: String,
            #[serde(default, rename = "intr_antc_vol")]
            expected_volume: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            output: Output,
        }
        let parsed: Payload = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("realtime response malformed: {e}")))?;

        Ok(RealtimeQuote {
            ticker: ticker.clone(),
            current: parsed.output.current.parse().unwrap_or(0),
            change_rate: parsed.output.change_rate.parse().unwrap_or(0.0),
            change_amount: parsed.output.change_amount.parse().unwrap_or(0),
            volume: parsed.output.volume.parse().unwrap_or(0),
            open: parsed.output.open.parse().unwrap_or(0),
            high: parsed.output.high.parse().unwrap_or(0),
            low: parsed.output.low.parse().unwrap_or(0),
            trading_value: parsed.output.trading_value.parse().unwrap_or(0),
            prev_close: parsed.output.prev_close.parse().unwrap_or(0),
            expected_diff: parsed.output.expected_diff.parse().unwrap_or(0),
            expected_change_rate: parsed.output.expected_change_rate.parse().unwrap_or(0.0),
            expected_volume: parsed.output.expected_volume.parse().unwrap_or(0),
        })
    }

    async fn realtime_bulk(
        &self,
        tickers: &[Ticker],
        staleness_sec: i64,
    ) -> AppResult<HashMap<Ticker, RealtimeQuote>> {
        let _ = staleness_sec;
        let mut out = HashMap::new();
        for ticker in tickers {
            if let Ok(q) = self.realtime_one(ticker).await {
                out.insert(ticker.clone(), q);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(out)
    }
}

impl VendorGateway {
    async fn fetch_index_raw(&self, index_code: &str) -> AppResult<(f64, f64, f64, i64)> {
        let token = self.ensure_token().await?;
        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-index-price", self.base_url);
        let response = retry_with_backoff(
            "vendor_index",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[("FID_INPUT_ISCD", index_code)])
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize, Default)]
        struct Output {
            #[serde(default, rename = "bstp_nmix_prpr")]
            close: String,
            #[serde(default, rename = "bstp_nmix_prdy_ctrt")]
            change_pct: String,
            #[serde(default, rename = "bstp_nmix_prdy_vrss")]
            change_pts: String,
            #[serde(default, rename = "acml_tr_pbmn")]
            trading_value: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            output: Output,
        }
        let parsed: Payload = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("index response malformed: {e}")))?;

        Ok((
            parsed.output.close.parse().unwrap_or(0.0),
            parsed.output.change_pct.parse().unwrap_or(0.0),
            parsed.output.change_pts.parse().unwrap_or(0.0),
            parsed.output.trading_value.parse().unwrap_or(0),
        ))
    }

    async fn fetch_snapshot_raw(&self, date: NaiveDate) -> AppResult<HashMap<Ticker, MarketSnapshotRow>> {
        let token = self.ensure_token().await?;
        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-daily-price", self.base_url);
        let response = retry_with_backoff(
            "vendor_snapshot",
            BackoffConfig::default(),
            Self::is_transient,
            || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[("FID_INPUT_DATE_1", &date.format("%Y%m%d").to_string())])
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(anyhow::Error::from)
            },
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(rename = "mksc_shrn_iscd")]
            ticker: String,
            #[serde(rename = "stck_oprc")]
            open: String,
            #[serde(rename = "stck_hgpr")]
            high: String,
            #[serde(rename = "stck_lwpr")]
            low: String,
            #[serde(rename = "stck_clpr")]
            close: String,
            #[serde(rename = "acml_vol")]
            volume: String,
            #[serde(rename = "prdy_ctrt")]
            change_rate: String,
            #[serde(rename = "hts_avls")]
            market_cap: String,
            #[serde(default, rename = "lstn_stcn")]
            listed_shares: String,
            #[serde(default, rename = "acml_tr_pbmn")]
            trading_value: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            output: Vec<Row>,
        }
        let parsed: Payload = response
            .json()
            .await
            .map_err(|e| AppError::permanent(format!("snapshot response malformed: {e}")))?;

        let mut out = HashMap::new();
        for row in parsed.output {
            let Ok(ticker) = Ticker::try_from(row.ticker.as_str()) else {
                continue;
            };
            out.insert(
                ticker.clone(),
                MarketSnapshotRow {
                    ticker,
                    open: row.open.parse().unwrap_or(0.0),
                    high: row.high.parse().unwrap_or(0.0),
                    low: row.low.parse().unwrap_or(0.0),
                    close: row.close.parse().unwrap_or(0.0),
                    volume: row.volume.parse().unwrap_or(0.0),
                    change_rate: row.change_rate.parse().unwrap_or(0.0),
                    market_cap: row.market_cap.parse().unwrap_or(0),
                    listed_shares: row.listed_shares.parse().unwrap_or(0),
                    trading_value: row.trading_value.parse().unwrap_or(0.0),
                },
            );
        }
        Ok(out)
    }
}
