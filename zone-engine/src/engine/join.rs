//! Scanner output joined with the margin reference.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{until_cancelled, EngineError, MitigationEngine};
use crate::data::{JoinedCandidate, MarginEntry, ScanCandidate, ScanDefinition};

/// Pair each candidate with its margin entry, dropping candidates without
/// one, then order by margin multiple descending. Equal margins keep input
/// order.
pub fn join_with_margins<F>(candidates: &[ScanCandidate], lookup: F) -> Vec<JoinedCandidate>
where
    F: Fn(&str) -> Option<MarginEntry>,
{
    let mut joined: Vec<JoinedCandidate> = candidates
        .iter()
        .filter_map(|c| lookup(&c.symbol).map(|m| JoinedCandidate::join(c, &m)))
        .collect();

    // sort_by is stable
    joined.sort_by(|a, b| b.margin_multiple.total_cmp(&a.margin_multiple));
    joined
}

impl MitigationEngine {
    /// Candidates for `definition` joined with margins.
    ///
    /// A cache hit skips the scanner. `refresh` bypasses the cache read; the
    /// fresh scanner output is written back either way.
    pub async fn fetch_with_margin(
        &self,
        definition: &ScanDefinition,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinedCandidate>, EngineError> {
        let cached = if refresh {
            None
        } else {
            self.scan_results.get(&definition.name)
        };

        let candidates = match cached {
            Some(candidates) => {
                debug!(strategy = %definition.name, "Scan result cache hit");
                candidates
            }
            None => {
                let fetched = until_cancelled(cancel, self.scanner.fetch_candidates(&definition.clause))
                    .await
                    .ok_or(EngineError::Cancelled)??;
                self.scan_results
                    .set(definition.name.clone(), fetched.clone());
                fetched
            }
        };

        let joined = join_with_margins(&candidates, |symbol| self.reference.margin(symbol));

        info!(
            strategy = %definition.name,
            scanned = candidates.len(),
            joined = joined.len(),
            refresh,
            "Joined scan with margins"
        );
        Ok(joined)
    }
}
