//! Mitigation detection and data-join engine.
//!
//! The engine owns no persistent state. It orchestrates:
//!
//! ```text
//! ScanSource ──► scan result cache ──► margin join (sorted by margin desc)
//!                                            │
//!                      ZoneStore ◄───────────┤
//!                                            ▼
//!            PriceHistoryProvider ──► mitigation rule ──► mitigation cache
//!                                 └─► zone derivation ──► ZoneStore upsert
//! ```
//!
//! Every external call is raced against the caller's [`CancellationToken`].

mod automation;
mod join;
mod mitigation;

pub use automation::{zone_from_history, AutomationReport, SymbolOutcome, MIN_CANDLES};
pub use join::join_with_margins;
pub use mitigation::mitigation_predicate;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zone_common::config::AutomationConfig;

use crate::data::{JoinedCandidate, PriceHistoryProvider, ScanCandidate, TtlCache};
use crate::reference::ReferenceData;
use crate::scanner::{ScanSource, ScannerError};
use crate::zones::{StoreError, ZoneKind, ZoneStore};

/// Lifetime of a mitigation batch in the cache
pub const MITIGATION_TTL: Duration = Duration::from_secs(3600);

/// Default lifetime of raw scanner output
pub const DEFAULT_SCAN_RESULT_TTL: Duration = Duration::from_secs(300);

/// How often expired cache entries are dropped
pub const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Strategy name → raw scanner candidates
pub type ScanResultCache = TtlCache<Vec<ScanCandidate>>;

/// Caller-chosen key → last mitigation batch
pub type MitigationCache = TtlCache<Vec<MitigationResult>>;

/// A symbol whose latest candle mitigated one of its zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationResult {
    pub symbol: String,
    pub name: String,
    pub margin_multiple: f64,
    pub last_close: f64,
    pub zone_date: NaiveDate,
}

impl MitigationResult {
    fn new(candidate: &JoinedCandidate, zone_date: NaiveDate) -> Self {
        Self {
            symbol: candidate.symbol.clone(),
            name: candidate.name.clone(),
            margin_multiple: candidate.margin_multiple,
            last_close: candidate.last_close,
            zone_date,
        }
    }
}

/// Errors surfaced by engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error(transparent)]
    Scanner(#[from] ScannerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's token fired before any result existed
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<EngineError> for zone_common::Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::StrategyNotFound(name) => {
                zone_common::Error::NotFound(format!("strategy {}", name))
            }
            EngineError::Scanner(e) => zone_common::Error::External(e.to_string()),
            EngineError::Store(e @ StoreError::NotFound { .. }) => {
                zone_common::Error::NotFound(e.to_string())
            }
            EngineError::Store(e) => zone_common::Error::Internal(e.to_string()),
            EngineError::Cancelled => zone_common::Error::Timeout,
        }
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// The engine. Collaborators are injected; caches are owned per instance.
pub struct MitigationEngine {
    scanner: Arc<dyn ScanSource>,
    history: Arc<dyn PriceHistoryProvider>,
    zones: Arc<dyn ZoneStore>,
    reference: Arc<ReferenceData>,
    scan_results: ScanResultCache,
    mitigations: MitigationCache,
    automation: AutomationConfig,
}

impl MitigationEngine {
    pub fn new(
        scanner: Arc<dyn ScanSource>,
        history: Arc<dyn PriceHistoryProvider>,
        zones: Arc<dyn ZoneStore>,
        reference: Arc<ReferenceData>,
    ) -> Self {
        Self {
            scanner,
            history,
            zones,
            reference,
            scan_results: ScanResultCache::new("scan_results", DEFAULT_SCAN_RESULT_TTL),
            mitigations: MitigationCache::unbounded("mitigations"),
            automation: AutomationConfig::default(),
        }
    }

    /// Replace the scan result cache with one using `ttl`.
    pub fn with_scan_result_ttl(mut self, ttl: Duration) -> Self {
        self.scan_results = ScanResultCache::new("scan_results", ttl);
        self
    }

    /// Override the automation strategy names.
    pub fn with_automation(mut self, automation: AutomationConfig) -> Self {
        self.automation = automation;
        self
    }

    pub fn zones(&self) -> &Arc<dyn ZoneStore> {
        &self.zones
    }

    pub fn reference(&self) -> &Arc<ReferenceData> {
        &self.reference
    }

    pub fn scan_result_cache(&self) -> &ScanResultCache {
        &self.scan_results
    }

    pub fn mitigation_cache(&self) -> &MitigationCache {
        &self.mitigations
    }

    /// Drop expired entries from the scan-result, mitigation and price
    /// history caches. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let scans = self.scan_results.clear_expired();
        let mitigations = self.mitigations.clear_expired();
        let histories = self.history.clear_expired();

        let removed = scans + mitigations + histories;
        if removed > 0 {
            debug!(scans, mitigations, histories, "Purged expired cache entries");
        }
        removed
    }

    /// Call [`Self::purge_expired`] every `every` until `shutdown` fires.
    pub async fn run_cache_purge(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.purge_expired();
                }
            }
        }

        debug!("Cache purge stopped");
    }

    /// Pre-fetch price history for every symbol that has stored zones.
    pub async fn warm_up_history(&self, cancel: &CancellationToken) -> Result<usize, EngineError> {
        let symbols: Vec<String> = match until_cancelled(cancel, self.zones.find_all()).await {
            Some(found) => found?.into_iter().map(|z| z.symbol).collect(),
            None => return Ok(0),
        };

        Ok(until_cancelled(cancel, self.history.warm_up(&symbols))
            .await
            .unwrap_or(0))
    }

    /// Strategy name the automation loop uses for `kind`.
    pub fn automation_strategy(&self, kind: ZoneKind) -> &str {
        match kind {
            ZoneKind::OrderBlock => &self.automation.order_block_strategy,
            ZoneKind::FairValueGap => &self.automation.fair_value_gap_strategy,
        }
    }
}
