//! Mitigation rule evaluation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{until_cancelled, EngineError, MitigationEngine, MitigationResult, MITIGATION_TTL};
use crate::data::{Candle, JoinedCandidate};
use crate::zones::{Zone, ZoneKind};

/// True when `today` dipped below the zone's upper bound intraday and closed
/// above it.
///
/// The `low < zone.low` clause is redundant while `zone.low <= zone.high`,
/// but stored zones are not guaranteed to satisfy that.
pub fn mitigation_predicate(today: &Candle, zone: &Zone) -> bool {
    (today.low < zone.high || today.low < zone.low) && today.close > zone.high
}

impl MitigationEngine {
    /// Find symbols of `strategy_name` whose latest candle mitigated one of
    /// their `kind` zones.
    ///
    /// Symbols without zones or price history are skipped. At most one
    /// result per symbol: the most recent mitigated zone. A non-empty batch
    /// is cached under `cache_key` for [`MITIGATION_TTL`]. If `cancel` fires,
    /// the results gathered so far are returned and nothing is cached.
    pub async fn evaluate_mitigation(
        &self,
        strategy_name: &str,
        cache_key: &str,
        kind: ZoneKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<MitigationResult>, EngineError> {
        let definition = self
            .reference
            .resolve(strategy_name)
            .ok_or_else(|| EngineError::StrategyNotFound(strategy_name.to_string()))?;

        let joined = match self.fetch_with_margin(&definition, false, cancel).await {
            Err(EngineError::Cancelled) => return Ok(Vec::new()),
            other => other?,
        };

        // First row wins for a symbol the scanner repeated
        let mut ids = Vec::new();
        let mut index: HashMap<&str, &JoinedCandidate> = HashMap::new();
        for candidate in &joined {
            if let Entry::Vacant(slot) = index.entry(candidate.symbol.as_str()) {
                slot.insert(candidate);
                ids.push(candidate.symbol.clone());
            }
        }

        let zones = match until_cancelled(cancel, self.zones.find_zones_for_symbols(&ids)).await {
            Some(found) => found?,
            None => return Ok(Vec::new()),
        };

        let mut results = Vec::new();
        let mut cancelled = false;

        for symbol in &ids {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let (Some(symbol_zones), Some(candidate)) = (zones.get(symbol), index.get(symbol.as_str()))
            else {
                continue;
            };
            let candidates = symbol_zones.zones(kind);
            if candidates.is_empty() {
                continue;
            }

            let history = match until_cancelled(cancel, self.history.fetch_history(symbol)).await {
                None => {
                    cancelled = true;
                    break;
                }
                Some(Ok(history)) => history,
                Some(Err(e)) => {
                    warn!(symbol = %symbol, error = %e, "Skipping symbol: price history unavailable");
                    continue;
                }
            };

            let Some(today) = history.first() else {
                debug!(symbol = %symbol, "Skipping symbol: empty price history");
                continue;
            };

            if let Some(zone) = candidates.iter().find(|z| mitigation_predicate(today, z)) {
                debug!(symbol = %symbol, zone_date = %zone.date, "Zone mitigated");
                results.push(MitigationResult::new(candidate, zone.date));
            }
        }

        if cancelled {
            info!(
                strategy = %strategy_name,
                partial = results.len(),
                "Mitigation evaluation cancelled"
            );
            return Ok(results);
        }

        if !results.is_empty() {
            self.mitigations
                .set_with_ttl(cache_key, results.clone(), Some(MITIGATION_TTL));
        }

        info!(
            strategy = %strategy_name,
            %kind,
            candidates = ids.len(),
            with_zones = zones.len(),
            mitigated = results.len(),
            "Mitigation evaluation complete"
        );
        Ok(results)
    }

    /// Last batch written under `cache_key`, if still live.
    pub fn cached_mitigations(&self, cache_key: &str) -> Option<Vec<MitigationResult>> {
        self.mitigations.get(cache_key)
    }
}
