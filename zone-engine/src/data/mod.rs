//! Market data types and the price history layer.
//!
//! Scanner output, margin reference rows, and daily candles all meet here:
//!
//! - [`ScanCandidate`]: one row of raw scanner output
//! - [`MarginEntry`]: leverage reference data keyed by symbol
//! - [`JoinedCandidate`]: a scanner row paired with its margin entry
//! - [`Candle`]: one trading day of price history, most-recent-first in sequences

mod cache;
mod history;
mod rate_limiter;

pub use cache::{CacheStats, TtlCache};
pub use history::{
    CachedHistoryProvider, ChartHistoryProvider, PriceHistoryProvider, ProviderError,
};
pub use rate_limiter::RateLimiter;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// Display formats a candle timestamp may arrive in, tried in order.
const DISPLAY_DATE_FORMATS: &[&str] = &["%d %b %Y", "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"];

/// Format used when rendering candle timestamps for display.
pub const DISPLAY_DATE_FORMAT: &str = "%d %b %Y";

// ============================================================================
// Scanner Types
// ============================================================================

/// One row of scanner output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCandidate {
    /// Exchange symbol
    #[serde(rename = "nsecode")]
    pub symbol: String,
    /// Company name as shown by the scanner
    #[serde(rename = "name", default)]
    pub display_name: String,
    /// Last close reported by the scanner
    #[serde(rename = "close", default)]
    pub last_close: f64,
}

/// JSON envelope returned by the scan endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanResponse {
    #[serde(default)]
    pub data: Vec<ScanCandidate>,
}

/// A named scan: the strategy name and the clause sent to the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDefinition {
    pub name: String,
    pub clause: String,
}

impl ScanDefinition {
    pub fn new(name: impl Into<String>, clause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clause: clause.into(),
        }
    }
}

// ============================================================================
// Margin Types
// ============================================================================

/// Margin/leverage reference row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginEntry {
    pub symbol: String,
    pub name: String,
    /// Leverage multiple offered on the symbol
    pub margin_multiple: f64,
}

/// A scanner candidate joined with its margin entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedCandidate {
    pub symbol: String,
    pub name: String,
    pub margin_multiple: f64,
    pub last_close: f64,
}

impl JoinedCandidate {
    /// Pair a scanner row with its margin entry.
    ///
    /// The reference name wins; the scanner's display name is used only when
    /// the reference row has none.
    pub fn join(candidate: &ScanCandidate, margin: &MarginEntry) -> Self {
        let name = if margin.name.trim().is_empty() {
            candidate.display_name.clone()
        } else {
            margin.name.clone()
        };

        Self {
            symbol: candidate.symbol.clone(),
            name,
            margin_multiple: margin.margin_multiple,
            last_close: candidate.last_close,
        }
    }
}

// ============================================================================
// Candle
// ============================================================================

/// One trading day of price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Display timestamp as delivered by the price feed (e.g. "17 May 2024")
    pub timestamp: String,
}

impl Candle {
    /// Calendar date of this candle, if the display timestamp parses.
    pub fn date(&self) -> Option<NaiveDate> {
        parse_display_date(&self.timestamp)
    }
}

/// Parse a candle display timestamp into a calendar date.
///
/// Accepts the display formats in [`DISPLAY_DATE_FORMATS`] and RFC 3339
/// timestamps. Returns `None` for anything else.
pub fn parse_display_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DISPLAY_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

// ============================================================================
// Tests
// ============================================================================
