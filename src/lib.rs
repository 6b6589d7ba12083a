//! Library root: module tree plus the shared [`AppState`] every HTTP
//! handler and background task closes over. Mirrors the teacher's
//! `lib.rs`, which re-exports its module tree and a single shared `State`
//! struct passed into both the API router and the scraper-loop tasks.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod normalize;
pub mod poller;
pub mod ranker;
pub mod reports;
pub mod scheduler;
pub mod store;
pub mod triggers;

use crate::analysis::AnalysisEngine;
use crate::gateway::MarketDataGateway;
use crate::llm::{Embedder, LlmClient};
use crate::reports::ReportEngine;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub gateway: Arc<dyn MarketDataGateway>,
    pub llm: LlmClient,
    pub embedder: Arc<dyn Embedder>,
    pub analysis_engine: Arc<AnalysisEngine>,
    pub report_engine: Arc<ReportEngine>,
}
