//! Process entry point: resolves config, wires the store/gateway/LLM
//! stack into one [`surge_backend::AppState`], then runs the HTTP server,
//! realtime poller, and scheduler as sibling tokio tasks until SIGINT or
//! SIGTERM, the same shutdown shape as the teacher's `main.rs`
//! (`tokio::select!` over the serve future and a ctrl_c/terminate future).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use surge_backend::analysis::AnalysisEngine;
use surge_backend::config::Config;
use surge_backend::gateway::vendor::VendorGateway;
use surge_backend::gateway::MarketDataGateway;
use surge_backend::llm::{IdentityEmbedder, LlmClient};
use surge_backend::models::Session;
use surge_backend::poller::Poller;
use surge_backend::reports::ReportEngine;
use surge_backend::scheduler::{reconcile_on_startup, JobId, Scheduler, SchedulerConfig};
use surge_backend::store::Store;
use surge_backend::{api, middleware, AppState};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let _tracing_guard = middleware::init_tracing(&config.log_level, config.log_path.as_deref());

    info!(port = config.port, "starting surge-backend");

    let store = Store::open(&config.database_path)?;

    let gateway: Arc<dyn MarketDataGateway> = Arc::new(VendorGateway::new(
        config.vendor_base_url.clone(),
        config.vendor_api_key.clone().unwrap_or_default(),
        config.vendor_api_secret.clone().unwrap_or_default(),
    ));

    let llm = LlmClient::new(config.llm_api_key.clone().unwrap_or_default(), config.llm_model.clone());
    let embedder: Arc<dyn surge_backend::llm::Embedder> = Arc::new(IdentityEmbedder);

    let analysis_engine = Arc::new(AnalysisEngine::new(
        store.clone(),
        gateway.clone(),
        llm.clone(),
        embedder.clone(),
        config.llm_model.clone(),
    ));
    let report_engine = Arc::new(ReportEngine::new(
        store.clone(),
        gateway.clone(),
        llm.clone(),
        config.llm_model.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        llm: llm.clone(),
        embedder: embedder.clone(),
        analysis_engine,
        report_engine: report_engine.clone(),
    };

    let (stop_tx, stop_rx) = watch::channel(false);

    let poller_stop = Arc::new(AtomicBool::new(false));
    let poller = Poller::new(store.clone(), gateway.clone(), poller_stop.clone());
    let poller_handle = tokio::spawn(async move { poller.run().await });

    let scheduler_handle = if config.scheduler_enabled {
        let sched_cfg = SchedulerConfig {
            morning_report_time: config.morning_report_time,
            morning_triggers_time: config.morning_triggers_time,
            afternoon_triggers_time: config.afternoon_triggers_time,
            afternoon_report_time: config.afternoon_report_time,
        };

        let due = reconcile_on_startup(&store, &sched_cfg, chrono::Utc::now());
        if !due.is_empty() {
            info!(jobs = ?due, "reconciling missed work at startup");
            for job in due {
                dispatch_job(job, &store, &gateway, &llm, &report_engine).await;
            }
        }

        let mut scheduler = Scheduler::new(store.clone(), sched_cfg, stop_rx.clone());
        let store_for_jobs = store.clone();
        let gateway_for_jobs = gateway.clone();
        let llm_for_jobs = llm.clone();
        let report_engine_for_jobs = report_engine.clone();
        Some(tokio::spawn(async move {
            scheduler
                .run(|job| {
                    let store = store_for_jobs.clone();
                    let gateway = gateway_for_jobs.clone();
                    let llm = llm_for_jobs.clone();
                    let report_engine = report_engine_for_jobs.clone();
                    async move {
                        dispatch_job(job, &store, &gateway, &llm, &report_engine).await;
                    }
                })
                .await;
        }))
    } else {
        info!("scheduler disabled via config");
        None
    };

    let router = api::build_router(state, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "http server listening");

    let serve = axum::serve(listener, router);
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                error!(error = %e, "http server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    poller_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = stop_tx.send(true);
    poller_handle.abort();
    if let Some(handle) = scheduler_handle {
        handle.abort();
    }

    Ok(())
}

async fn dispatch_job(
    job: JobId,
    store: &Arc<Store>,
    gateway: &Arc<dyn MarketDataGateway>,
    llm: &LlmClient,
    report_engine: &Arc<ReportEngine>,
) {
    let today = chrono::Utc::now().date_naive();
    match job {
        JobId::FinancialBatch => {
            // The financial filter batch is an external nightly job in the
            // original system (a separate screener writing `filtered_stocks`
            // directly); this process only consumes that table, so there is
            // nothing to dispatch here beyond logging the reconciliation hit.
            info!("financial_batch job observed due; filtered_stocks is populated out-of-process");
        }
        JobId::MorningReport => {
            let filtered = match store.filtered_stocks_passing() {
                Ok(f) => f,
                Err(e) => {
                    error!(error = %e, "failed to load filtered universe for morning report");
                    return;
                }
            };
            let embedder = IdentityEmbedder;
            match surge_backend::ranker::rank_top_n(gateway, llm, &embedder, filtered, today).await {
                Ok(top10) => {
                    if let Err(e) = report_engine.generate_morning(today, &top10).await {
                        error!(error = %e, "morning report generation failed");
                    }
                }
                Err(e) => error!(error = %e, "ranker failed for morning report"),
            }
        }
        JobId::MorningTriggers => run_trigger_session(Session::Morning, store, gateway).await,
        JobId::AfternoonTriggers => run_trigger_session(Session::Afternoon, store, gateway).await,
        JobId::AfternoonReport => {
            let afternoon = store.trigger_results_for(today, Session::Afternoon).unwrap_or_default();
            let morning = store.trigger_results_for(today, Session::Morning).unwrap_or_default();
            let prev_day = match gateway.previous_trading_day(today, 10).await {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "failed to resolve previous trading day for afternoon report");
                    return;
                }
            };
            match gateway.index(prev_day).await {
                Ok(index) => {
                    if let Err(e) = report_engine.generate_afternoon(today, &afternoon, &morning, &index).await {
                        error!(error = %e, "afternoon report generation failed");
                    }
                }
                Err(e) => error!(error = %e, "failed to fetch market index for afternoon report"),
            }
        }
    }
}

async fn run_trigger_session(session: Session, store: &Arc<Store>, gateway: &Arc<dyn MarketDataGateway>) {
    let today = chrono::Utc::now().date_naive();
    let rows = match surge_backend::triggers::assemble_universe(store, gateway, today).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, session = ?session, "failed to assemble universe for trigger session");
            return;
        }
    };
    if let Err(e) = surge_backend::triggers::run_session(store, today, session, rows, None).await {
        error!(error = %e, session = ?session, "trigger session failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
