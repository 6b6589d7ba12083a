use super::{parse_date, ApiResponse};
use crate::error::{AppError, AppResult};
use crate::models::{Session, TriggerResult, TriggerType};
use crate::triggers;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    pub date: Option<String>,
    pub session: Option<String>,
}

fn parse_session(s: &str) -> AppResult<Session> {
    match s {
        "morning" => Ok(Session::Morning),
        "afternoon" => Ok(Session::Afternoon),
        other => Err(AppError::validation(format!("invalid session: {other}"))),
    }
}

fn parse_trigger_type_param(s: &str) -> AppResult<TriggerType> {
    match s {
        "volume_surge" => Ok(TriggerType::VolumeSurge),
        "gap_up" => Ok(TriggerType::GapUp),
        "fund_inflow" => Ok(TriggerType::FundInflow),
        "intraday_rise" => Ok(TriggerType::IntradayRise),
        "closing_strength" => Ok(TriggerType::ClosingStrength),
        "sideways_volume" => Ok(TriggerType::SidewaysVolume),
        "pre_surge" => Ok(TriggerType::PreSurge),
        other => Err(AppError::validation(format!("invalid trigger type: {other}"))),
    }
}

fn today_session(now_hour: u32) -> Session {
    if now_hour < 12 {
        Session::Morning
    } else {
        Session::Afternoon
    }
}

pub async fn list_triggers(
    Query(q): Query<TriggerQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<TriggerResult>>>> {
    let date = match &q.date {
        Some(s) => parse_date(s)?,
        None => chrono::Utc::now().date_naive(),
    };
    let session = match &q.session {
        Some(s) => parse_session(s)?,
        None => today_session(current_hour()),
    };
    let results = state.store.trigger_results_for(date, session)?;
    Ok(ApiResponse::ok(results))
}

pub async fn latest_triggers(State(state): State<AppState>) -> AppResult<Json<ApiResponse<Vec<TriggerResult>>>> {
    let now = chrono::Utc::now();
    let date = now.date_naive();
    let session = today_session(current_hour());
    let results = state.store.trigger_results_for(date, session)?;
    if results.is_empty() && session == Session::Afternoon {
        let morning = state.store.trigger_results_for(date, Session::Morning)?;
        return Ok(ApiResponse::ok(morning));
    }
    Ok(ApiResponse::ok(results))
}

pub async fn by_type(
    Path(trigger_type): Path<String>,
    Query(q): Query<TriggerQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<TriggerResult>>>> {
    let trigger_type = parse_trigger_type_param(&trigger_type)?;
    let date = match &q.date {
        Some(s) => parse_date(s)?,
        None => chrono::Utc::now().date_naive(),
    };
    let session = match &q.session {
        Some(s) => parse_session(s)?,
        None => today_session(current_hour()),
    };
    let all = state.store.trigger_results_for(date, session)?;
    let filtered = all.into_iter().filter(|r| r.trigger_type == trigger_type).collect();
    Ok(ApiResponse::ok(filtered))
}

pub async fn ticker_history(
    Path(ticker): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<TriggerResult>>>> {
    let ticker = super::parse_ticker(&ticker)?;
    let today = chrono::Utc::now().date_naive();
    let mut out = Vec::new();
    for session in [Session::Morning, Session::Afternoon] {
        let rows = state.store.trigger_results_for(today, session)?;
        out.extend(rows.into_iter().filter(|r| r.ticker == ticker));
    }
    Ok(ApiResponse::ok(out))
}

pub async fn run_session_handler(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let session = parse_session(&session)?;
    let date = chrono::Utc::now().date_naive();
    let rows = triggers::assemble_universe(&state.store, &state.gateway, date).await?;
    let by_type = triggers::run_session(&state.store, date, session, rows, None)
        .await
        .map_err(AppError::Internal)?;
    let count: usize = by_type.values().map(|v| v.len()).sum();
    Ok(ApiResponse::ok(serde_json::json!({ "triggers_found": count })))
}

#[derive(Debug, Serialize)]
pub struct TriggerStats {
    pub morning_count: i64,
    pub afternoon_count: i64,
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<ApiResponse<TriggerStats>>> {
    let today = chrono::Utc::now().date_naive();
    let morning_count = state.store.trigger_results_count(today, Session::Morning)?;
    let afternoon_count = state.store.trigger_results_count(today, Session::Afternoon)?;
    Ok(ApiResponse::ok(TriggerStats { morning_count, afternoon_count }))
}

fn current_hour() -> u32 {
    use chrono::Timelike;
    chrono::Utc::now().hour()
}
