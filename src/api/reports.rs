use super::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::models::{ReportResult, ReportType};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Timelike;
use serde::{Deserialize, Serialize};

fn parse_report_type(s: &str) -> AppResult<ReportType> {
    match s {
        "morning" => Ok(ReportType::Morning),
        "afternoon" => Ok(ReportType::Afternoon),
        other => Err(AppError::validation(format!("invalid report type: {other}"))),
    }
}

pub async fn get_report(
    Path(report_type): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<ReportResult>>> {
    let report_type = parse_report_type(&report_type)?;
    let today = chrono::Utc::now().date_naive();
    let report = state
        .store
        .report_result(report_type, today)?
        .ok_or_else(|| AppError::not_found(format!("no {} report for {today}", report_type.as_str())))?;
    Ok(ApiResponse::ok(report))
}

pub async fn latest(State(state): State<AppState>) -> AppResult<Json<ApiResponse<ReportResult>>> {
    let now = chrono::Utc::now();
    let today = now.date_naive();
    match state.report_engine.latest(today, now.hour()).map_err(AppError::Internal)? {
        Some((_, report)) => Ok(ApiResponse::ok(report)),
        None => Err(AppError::not_found("no report available for the current session yet")),
    }
}

pub async fn generate(
    Path(report_type): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<ReportResult>>> {
    let report_type = parse_report_type(&report_type)?;
    let today = chrono::Utc::now().date_naive();
    let report = match report_type {
        ReportType::Morning => {
            let filtered = state.store.filtered_stocks_passing()?;
            let top10 = crate::ranker::rank_top_n(
                &state.gateway,
                &state.llm,
                state.embedder.as_ref(),
                filtered,
                today,
            )
            .await
            .map_err(AppError::Internal)?;
            state
                .report_engine
                .generate_morning(today, &top10)
                .await
                .map_err(AppError::Internal)?
        }
        ReportType::Afternoon => {
            let afternoon = state.store.trigger_results_for(today, crate::models::Session::Afternoon)?;
            let morning = state.store.trigger_results_for(today, crate::models::Session::Morning)?;
            let prev_day = state.gateway.previous_trading_day(today, 10).await?;
            let index = state.gateway.index(prev_day).await?;
            state
                .report_engine
                .generate_afternoon(today, &afternoon, &morning, &index)
                .await
                .map_err(AppError::Internal)?
        }
    };
    Ok(ApiResponse::ok(report))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn history(
    Query(q): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<ReportResult>>>> {
    let limit = q.limit.unwrap_or(7).clamp(1, 30);
    let today = chrono::Utc::now().date_naive();
    let mut out = Vec::new();
    let mut cursor = today;
    while out.len() < limit * 2 && (today - cursor).num_days() < 60 {
        if let Some(r) = state.store.report_result(ReportType::Morning, cursor)? {
            out.push(r);
        }
        if let Some(r) = state.store.report_result(ReportType::Afternoon, cursor)? {
            out.push(r);
        }
        cursor = match cursor.pred_opt() {
            Some(d) => d,
            None => break,
        };
    }
    out.truncate(limit);
    Ok(ApiResponse::ok(out))
}

#[derive(Debug, Serialize)]
pub struct ReportStats {
    pub morning_present_today: bool,
    pub afternoon_present_today: bool,
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<ApiResponse<ReportStats>>> {
    let today = chrono::Utc::now().date_naive();
    Ok(ApiResponse::ok(ReportStats {
        morning_present_today: state.store.report_result(ReportType::Morning, today)?.is_some(),
        afternoon_present_today: state.store.report_result(ReportType::Afternoon, today)?.is_some(),
    }))
}
