//! Zone Engine Library
//!
//! Detects when price has mitigated previously recorded supply/demand zones
//! (order blocks and fair value gaps) for symbols selected by an external
//! scanner, and maintains those zones from recent price history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    zone-engine (Rust Service)                       │
//! │                           :4470                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  Scanner        │  │  Mitigation     │  │  Zone Store     │      │
//! │  │  Client (XSRF)  │─▶│  Engine         │◀▶│  (SQLite)       │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! │  ┌─────────────────┐          ▲            ┌─────────────────┐      │
//! │  │  Price History  │──────────┘            │  Reference Data │      │
//! │  │  (rate limited) │                       │  (margins)      │      │
//! │  └─────────────────┘                       └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Mitigation
//! - The latest candle dipped below a zone's upper bound intraday
//! - and closed back above it
//! - At most one (the most recent) mitigated zone is reported per symbol
//!
//! ## Zone Automation
//! - **Order block**: high/low of the candle three sessions back
//! - **Fair value gap**: high three sessions back, low of the latest session

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod engine;
pub mod reference;
pub mod routes;
pub mod scanner;
pub mod scheduler;
pub mod zones;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use zone_common::config::Config;

use crate::data::{CachedHistoryProvider, ChartHistoryProvider};
use crate::engine::{MitigationEngine, CACHE_PURGE_INTERVAL};
use crate::reference::ReferenceData;
use crate::scanner::ScannerClient;
use crate::scheduler::AutomationScheduler;
use crate::zones::SqliteZoneStore;

/// Upper bound for one HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Service state shared by every route
pub struct MitigationState {
    /// Configuration
    pub config: Config,
    /// Mitigation engine
    pub engine: Arc<MitigationEngine>,
    /// Fires on shutdown; request and background tokens are its children
    pub shutdown: CancellationToken,
}

impl MitigationState {
    /// Wire the production collaborators from config.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            SqliteZoneStore::from_config(&config.storage).with_context(|| {
                format!("Failed to open zone store at {}", config.storage.db_path.display())
            })?,
        );
        let reference = Arc::new(ReferenceData::new(store.clone()));
        let scanner = Arc::new(ScannerClient::from_config(&config.scanner));
        let history = Arc::new(CachedHistoryProvider::new(
            ChartHistoryProvider::from_config(&config.history),
            Duration::from_secs(config.history.cache_ttl_secs),
        ));

        let engine = MitigationEngine::new(scanner, history, store, reference)
            .with_scan_result_ttl(Duration::from_secs(config.cache.scan_result_ttl_secs))
            .with_automation(config.automation.clone());

        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// State around an already-built engine.
    pub fn with_engine(config: Config, engine: Arc<MitigationEngine>) -> Self {
        Self {
            config,
            engine,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the HTTP router
pub fn router(state: Arc<MitigationState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/scans/:strategy", get(routes::get_scan))
        .route("/api/v1/mitigations", post(routes::evaluate_mitigations))
        .route("/api/v1/mitigations/:cache_key", get(routes::get_cached_mitigations))
        .route("/api/v1/automation/:kind", post(routes::trigger_automation))
        .route("/api/v1/reference/reload", post(routes::reload_reference))
        .route("/api/v1/zones/:symbol", get(routes::get_zones))
        .route("/api/v1/zones/:symbol/:kind/:date", delete(routes::delete_zone))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Main zone service
pub struct MitigationService {
    state: Arc<MitigationState>,
}

impl MitigationService {
    /// Create a new service from config
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(MitigationState::new(config)?);
        Ok(Self { state })
    }

    /// Token that stops the server and background tasks when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Load reference data, start the scheduler and serve HTTP until shutdown
    pub async fn start(self) -> Result<()> {
        let reference = self.state.engine.reference();
        match reference.reload_all().await {
            Ok((margins, strategies)) => {
                tracing::info!(margins, strategies, "Reference data loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load reference data, starting empty");
            }
        }

        // Warm the price history cache for symbols with zones
        let engine = Arc::clone(&self.state.engine);
        let warm_up_cancel = self.state.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = engine.warm_up_history(&warm_up_cancel).await {
                tracing::warn!(error = %e, "Price history warm-up failed");
            }
        });

        // Drop expired cache entries periodically
        let engine = Arc::clone(&self.state.engine);
        let purge_shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            engine
                .run_cache_purge(CACHE_PURGE_INTERVAL, purge_shutdown)
                .await;
        });

        // Start the automation scheduler
        let scheduler = AutomationScheduler::new(
            &self.state.config.automation,
            Arc::clone(&self.state.engine),
        )?;
        let scheduler_shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        // Start HTTP server
        let addr: SocketAddr = self
            .state
            .config
            .listen_addr()
            .parse()
            .with_context(|| format!("Invalid listen address {}", self.state.config.listen_addr()))?;
        tracing::info!(address = %addr, "Starting HTTP server");

        let shutdown = self.state.shutdown.clone();
        let app = router(Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
