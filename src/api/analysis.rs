use super::{parse_ticker, ApiResponse};
use crate::error::{AppError, AppResult};
use crate::models::AnalysisResult;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

pub async fn get_analysis(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<AnalysisResult>>> {
    let ticker = parse_ticker(&ticker)?;
    let result = state
        .analysis_engine
        .get_analysis(&ticker, false)
        .await
        .map_err(AppError::Internal)?;
    Ok(ApiResponse::ok(result))
}

pub async fn refresh_analysis(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<AnalysisResult>>> {
    let ticker = parse_ticker(&ticker)?;
    let result = state
        .analysis_engine
        .get_analysis(&ticker, true)
        .await
        .map_err(AppError::Internal)?;
    Ok(ApiResponse::ok(result))
}

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub cached: bool,
    pub generated_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn cache_status(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<CacheStatus>>> {
    let ticker = parse_ticker(&ticker)?;
    let today = chrono::Utc::now().date_naive();
    let cached = state.store.analysis_result(&ticker, today)?;
    Ok(ApiResponse::ok(CacheStatus {
        cached: cached.is_some(),
        generated_at: cached.map(|c| c.generated_at),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub tickers: Vec<String>,
}

pub async fn batch_analysis(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> AppResult<Json<ApiResponse<Vec<AnalysisResult>>>> {
    if body.tickers.len() > 10 {
        return Err(AppError::validation("at most 10 tickers per batch request"));
    }
    let mut out = Vec::with_capacity(body.tickers.len());
    for raw in &body.tickers {
        let ticker = super::parse_ticker(raw)?;
        match state.analysis_engine.get_analysis(&ticker, false).await {
            Ok(result) => out.push(result),
            Err(e) => tracing::warn!(ticker = %raw, error = %e, "batch analysis entry failed"),
        }
    }
    Ok(ApiResponse::ok(out))
}

#[derive(Debug, Deserialize)]
pub struct PopularQuery {
    pub limit: Option<usize>,
}

pub async fn popular(
    Query(q): Query<PopularQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let limit = q.limit.unwrap_or(10).clamp(1, 20);
    let tickers = state.store.filtered_tickers_passing()?;
    let popular = tickers.into_iter().take(limit).map(|t| t.as_str().to_string()).collect();
    Ok(ApiResponse::ok(popular))
}

pub async fn comparison(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let ticker = parse_ticker(&ticker)?;
    let technicals = state.gateway.technicals(&ticker, chrono::Utc::now().date_naive()).await?;
    let fundamentals = state.gateway.fundamentals(&ticker).await?;
    Ok(ApiResponse::ok(serde_json::json!({
        "ticker": ticker.as_str(),
        "per": fundamentals.per,
        "pbr": fundamentals.pbr,
        "roe": fundamentals.roe,
        "rsi": technicals.rsi,
    })))
}
