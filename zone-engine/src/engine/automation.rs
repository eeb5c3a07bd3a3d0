//! Zone automation loop.
//!
//! Scans a kind-specific strategy, derives one zone per candidate from its
//! last three candles and upserts it. Per-symbol problems are recorded in
//! the [`AutomationReport`] and never fail the run.

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{until_cancelled, EngineError, MitigationEngine};
use crate::data::Candle;
use crate::zones::{Zone, ZoneKind};

/// Candles needed to derive a zone; index 0 is the most recent
pub const MIN_CANDLES: usize = 3;

/// What happened to one symbol during an automation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Saved { date: NaiveDate },
    Skipped { reason: String },
    Failed { error: String },
}

/// Per-symbol outcomes of one automation run.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationReport {
    pub kind: ZoneKind,
    pub strategy: String,
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl AutomationReport {
    fn new(kind: ZoneKind, strategy: impl Into<String>) -> Self {
        Self {
            kind,
            strategy: strategy.into(),
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, symbol: &str, outcome: SymbolOutcome) {
        self.outcomes.push((symbol.to_string(), outcome));
    }

    /// Outcome recorded for `symbol`, if it was processed.
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, outcome)| outcome)
    }

    pub fn saved(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Saved { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SymbolOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Derive a zone from most-recent-first candles.
///
/// Order block: high and low of the candle at offset 2. Fair value gap: high
/// from offset 2, low from offset 0. The date is always offset 2's.
fn derive_zone(kind: ZoneKind, candles: &[Candle]) -> Result<Zone, String> {
    if candles.len() < MIN_CANDLES {
        return Err(format!(
            "need {} candles, got {}",
            MIN_CANDLES,
            candles.len()
        ));
    }

    let source = &candles[2];
    let date = source
        .date()
        .ok_or_else(|| format!("unparsable candle date {:?}", source.timestamp))?;

    let (high, low) = match kind {
        ZoneKind::OrderBlock => (source.high, source.low),
        ZoneKind::FairValueGap => (source.high, candles[0].low),
    };

    Ok(Zone::new(source.symbol.clone(), date, high, low))
}

/// Zone for `kind` from most-recent-first `candles`, or `None` when there
/// are too few candles or the source date does not parse.
pub fn zone_from_history(kind: ZoneKind, candles: &[Candle]) -> Option<Zone> {
    derive_zone(kind, candles).ok()
}

impl MitigationEngine {
    /// Derive and save zones of `kind` for every candidate of its strategy.
    ///
    /// Fails only when the strategy is unknown. Cancellation stops the loop
    /// and returns the outcomes recorded so far.
    pub async fn automate(
        &self,
        kind: ZoneKind,
        cancel: &CancellationToken,
    ) -> Result<AutomationReport, EngineError> {
        let strategy = self.automation_strategy(kind).to_string();
        let definition = self
            .reference
            .resolve(&strategy)
            .ok_or_else(|| EngineError::StrategyNotFound(strategy.clone()))?;

        let mut report = AutomationReport::new(kind, strategy);

        let joined = match self.fetch_with_margin(&definition, false, cancel).await {
            Ok(joined) => joined,
            Err(EngineError::Cancelled) => return Ok(report),
            Err(e) => {
                warn!(%kind, strategy = %report.strategy, error = %e, "Automation scan failed");
                return Ok(report);
            }
        };

        for candidate in &joined {
            if cancel.is_cancelled() {
                info!(%kind, "Automation cancelled");
                break;
            }

            let symbol = candidate.symbol.as_str();
            let history = match until_cancelled(cancel, self.history.fetch_history(symbol)).await {
                None => break,
                Some(Ok(history)) => history,
                Some(Err(e)) => {
                    debug!(symbol, error = %e, "Price history fetch failed");
                    report.record(symbol, SymbolOutcome::Failed { error: e.to_string() });
                    continue;
                }
            };

            let zone = match derive_zone(kind, &history) {
                Ok(zone) => Zone {
                    symbol: symbol.to_string(),
                    ..zone
                },
                Err(reason) => {
                    debug!(symbol, %reason, "Skipping symbol");
                    report.record(symbol, SymbolOutcome::Skipped { reason });
                    continue;
                }
            };

            let date = zone.date;
            let saved = match until_cancelled(cancel, self.zones.upsert_zone(kind, zone)).await {
                None => break,
                Some(saved) => saved,
            };
            match saved {
                Ok(()) => report.record(symbol, SymbolOutcome::Saved { date }),
                Err(e) => {
                    warn!(symbol, error = %e, "Failed to save zone");
                    report.record(symbol, SymbolOutcome::Failed { error: e.to_string() });
                }
            }
        }

        info!(
            %kind,
            strategy = %report.strategy,
            saved = report.saved(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Automation run complete"
        );
        Ok(report)
    }

    /// Run every zone kind concurrently. One kind failing does not affect
    /// the other. Results are in [`ZoneKind::ALL`] order.
    pub async fn automate_all(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<Result<AutomationReport, EngineError>> {
        let runs = join_all(ZoneKind::ALL.iter().map(|kind| self.automate(*kind, cancel))).await;

        for (kind, run) in ZoneKind::ALL.iter().zip(&runs) {
            if let Err(e) = run {
                warn!(%kind, error = %e, "Automation run failed");
            }
        }
        runs
    }
}
