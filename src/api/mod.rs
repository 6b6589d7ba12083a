//! HTTP API (spec.md §6): one `routes.rs`-per-resource layout, wired into
//! one `Router` behind `CorsLayer` + `TraceLayer`, mirroring teacher's
//! `src/api/` module split.

pub mod analysis;
pub mod reports;
pub mod stocks;
pub mod triggers;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(Self { success: true, data })
    }
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/stocks/:ticker", get(stocks::get_stock))
        .route("/stocks/:ticker/price", get(stocks::get_price_history))
        .route("/stocks/:ticker/current", get(stocks::get_current_price))
        .route("/stocks/:ticker/technical", get(stocks::get_technical))
        .route("/stocks", get(stocks::search_stocks))
        .route("/triggers", get(triggers::list_triggers))
        .route("/triggers/latest", get(triggers::latest_triggers))
        .route("/triggers/types/:trigger_type", get(triggers::by_type))
        .route("/triggers/:ticker/history", get(triggers::ticker_history))
        .route("/triggers/run/:session", post(triggers::run_session_handler))
        .route("/triggers/stats", get(triggers::stats))
        .route("/analysis/:ticker", get(analysis::get_analysis))
        .route("/analysis/:ticker/refresh", post(analysis::refresh_analysis))
        .route("/analysis/:ticker/cache-status", get(analysis::cache_status))
        .route("/analysis/batch", post(analysis::batch_analysis))
        .route("/analysis/popular", get(analysis::popular))
        .route("/analysis/:ticker/comparison", get(analysis::comparison))
        .route("/reports/:report_type", get(reports::get_report))
        .route("/reports/latest", get(reports::latest))
        .route("/reports/:report_type/generate", post(reports::generate))
        .route("/reports/history", get(reports::history))
        .route("/reports/stats", get(reports::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub(crate) fn parse_date(s: &str) -> crate::error::AppResult<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| crate::error::AppError::validation(format!("invalid date: {s}")))
}

pub(crate) fn parse_ticker(s: &str) -> crate::error::AppResult<crate::models::Ticker> {
    crate::models::Ticker::try_from(s).map_err(crate::error::AppError::validation)
}
