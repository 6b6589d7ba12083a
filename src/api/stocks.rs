use super::{parse_date, parse_ticker, ApiResponse};
use crate::error::{AppError, AppResult};
use crate::models::PriceBar;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct StockInfo {
    pub ticker: String,
    pub name: String,
    pub per: f64,
    pub pbr: f64,
    pub roe: f64,
    pub market_cap: i64,
}

pub async fn get_stock(Path(ticker): Path<String>, State(state): State<AppState>) -> AppResult<Json<ApiResponse<StockInfo>>> {
    let ticker = parse_ticker(&ticker)?;
    let stock = state
        .store
        .filtered_stock(&ticker)?
        .ok_or_else(|| AppError::not_found(format!("no stock info for {ticker}")))?;
    Ok(ApiResponse::ok(StockInfo {
        ticker: ticker.as_str().to_string(),
        name: stock.name,
        per: stock.per,
        pbr: stock.pbr,
        roe: stock.roe,
        market_cap: stock.market_cap,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[allow(dead_code)]
    pub period: Option<String>,
}

pub async fn get_price_history(
    Path(ticker): Path<String>,
    Query(q): Query<PriceQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<PriceBar>>>> {
    let ticker = parse_ticker(&ticker)?;
    let end = match &q.end_date {
        Some(s) => parse_date(s)?,
        None => chrono::Utc::now().date_naive(),
    };
    let start = match &q.start_date {
        Some(s) => parse_date(s)?,
        None => end - chrono::Duration::days(90),
    };
    let bars = state.gateway.history(&ticker, start, end).await?;
    Ok(ApiResponse::ok(bars))
}

#[derive(Debug, Serialize)]
pub struct CurrentPriceResponse {
    pub current: i64,
    pub change_rate: f64,
    pub volume: i64,
}

pub async fn get_current_price(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<CurrentPriceResponse>>> {
    let ticker = parse_ticker(&ticker)?;
    if let Some(cached) = state.store.realtime_price(&ticker)? {
        if cached.is_fresh(chrono::Utc::now(), crate::models::RealtimePrice::TRIGGER_FALLBACK_STALENESS_SECS)
            && cached.is_live()
        {
            return Ok(ApiResponse::ok(CurrentPriceResponse {
                current: cached.current,
                change_rate: cached.change_rate,
                volume: cached.volume,
            }));
        }
    }
    let quote = state.gateway.realtime_one(&ticker).await?;
    Ok(ApiResponse::ok(CurrentPriceResponse {
        current: quote.current,
        change_rate: quote.change_rate,
        volume: quote.volume,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TechnicalQuery {
    pub date: Option<String>,
}

pub async fn get_technical(
    Path(ticker): Path<String>,
    Query(q): Query<TechnicalQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<crate::models::Technicals>>> {
    let ticker = parse_ticker(&ticker)?;
    let date = match &q.date {
        Some(s) => parse_date(s)?,
        None => chrono::Utc::now().date_naive(),
    };
    let technicals = state.gateway.technicals(&ticker, date).await?;
    Ok(ApiResponse::ok(technicals))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    #[allow(dead_code)]
    pub market: Option<String>,
    #[allow(dead_code)]
    pub min_per: Option<f64>,
    #[allow(dead_code)]
    pub sort_by: Option<String>,
    pub limit: Option<usize>,
}

pub async fn search_stocks(
    Query(q): Query<SearchQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let limit = q.limit.unwrap_or(20);
    let tickers = state.store.filtered_tickers_passing()?;
    let filtered: Vec<String> = match &q.keyword {
        Some(keyword) => {
            let wanted: Vec<&str> = keyword.split(',').map(|s| s.trim()).collect();
            tickers
                .iter()
                .filter(|t| wanted.contains(&t.as_str()))
                .map(|t| t.as_str().to_string())
                .collect()
        }
        None => tickers.iter().take(limit).map(|t| t.as_str().to_string()).collect(),
    };
    Ok(ApiResponse::ok(filtered))
}
