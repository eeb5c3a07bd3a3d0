//! Daily price history providers.
//!
//! The engine only needs "the latest daily candles for a symbol, newest
//! first". [`ChartHistoryProvider`] fetches them from a chart-style JSON API;
//! [`CachedHistoryProvider`] wraps any provider with a warm-up cache so the
//! automation loop and mitigation scans do not refetch the same symbol.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use zone_common::config::HistoryConfig;

use super::cache::TtlCache;
use super::rate_limiter::RateLimiter;
use super::{Candle, DISPLAY_DATE_FORMAT};

/// Chart endpoint, relative to the configured base URL
const CHART_ENDPOINT: &str = "/v8/finance/chart";

// ============================================================================
// Provider Trait
// ============================================================================

/// Errors from a price history provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),
    /// Upstream throttled the request
    #[error("Rate limited by price feed")]
    RateLimited,
    /// The feed does not know the symbol
    #[error("Data not available: {0}")]
    DataNotAvailable(String),
    /// Unexpected status or body
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Source of daily candles.
///
/// Implementations return candles ordered most-recent-first. An empty vector
/// means "no data" and is not an error.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Provider name (for logging)
    fn name(&self) -> &'static str;

    /// Fetch recent daily candles for `symbol`, newest first.
    async fn fetch_history(&self, symbol: &str) -> Result<Vec<Candle>, ProviderError>;

    /// Pre-fetch `symbols` into the provider's cache, returning how many
    /// now have cached data. Uncached providers do nothing.
    async fn warm_up(&self, _symbols: &[String]) -> usize {
        0
    }

    /// Drop expired cached histories, returning how many were removed.
    /// Uncached providers hold nothing to drop.
    fn clear_expired(&self) -> usize {
        0
    }
}

#[async_trait]
impl<P: PriceHistoryProvider + ?Sized> PriceHistoryProvider for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn fetch_history(&self, symbol: &str) -> Result<Vec<Candle>, ProviderError> {
        (**self).fetch_history(symbol).await
    }

    async fn warm_up(&self, symbols: &[String]) -> usize {
        (**self).warm_up(symbols).await
    }

    fn clear_expired(&self) -> usize {
        (**self).clear_expired()
    }
}

// ============================================================================
// Chart API Response
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    /// Exchange offset from UTC in seconds
    #[serde(default)]
    gmtoffset: i32,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Convert a chart payload into newest-first candles.
///
/// Rows with any missing price (holidays, halted sessions) are dropped.
fn parse_chart(symbol: &str, body: &str) -> Result<Vec<Candle>, ProviderError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| ProviderError::Internal(format!("Failed to parse chart: {}", e)))?;

    if let Some(err) = envelope.chart.error {
        return Err(ProviderError::DataNotAvailable(format!(
            "{}: {}",
            err.code, err.description
        )));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };

    let offset = FixedOffset::east_opt(result.meta.gmtoffset).unwrap_or_else(|| Utc.fix());
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let prices = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        );
        let (Some(open), Some(high), Some(low), Some(close)) = prices else {
            continue;
        };
        let Some(at) = DateTime::from_timestamp(*ts, 0) else {
            continue;
        };

        candles.push(Candle {
            symbol: symbol.to_string(),
            open,
            high,
            low,
            close,
            timestamp: at.with_timezone(&offset).format(DISPLAY_DATE_FORMAT).to_string(),
        });
    }

    // The API returns oldest first
    candles.reverse();
    Ok(candles)
}

// ============================================================================
// Chart History Provider
// ============================================================================

/// Price history from a chart-style JSON API.
pub struct ChartHistoryProvider {
    base_url: String,
    symbol_suffix: String,
    range: String,
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl ChartHistoryProvider {
    /// Create from config
    pub fn from_config(config: &HistoryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            symbol_suffix: config.symbol_suffix.clone(),
            range: config.range.clone(),
            client,
            rate_limiter: RateLimiter::new("price-history", config.rate_limit_rpm),
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}{}/{}{}?range={}&interval=1d",
            self.base_url, CHART_ENDPOINT, symbol, self.symbol_suffix, self.range
        )
    }
}

#[async_trait]
impl PriceHistoryProvider for ChartHistoryProvider {
    fn name(&self) -> &'static str {
        "chart"
    }

    async fn fetch_history(&self, symbol: &str) -> Result<Vec<Candle>, ProviderError> {
        self.rate_limiter.acquire().await;

        let url = self.chart_url(symbol);
        debug!(url = %url, symbol, "Fetching price history");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Network("Request timeout".into())
            } else if e.is_connect() {
                ProviderError::Network("Connection failed".into())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Internal(format!("HTTP {}: {}", status, body)));
        }

        parse_chart(symbol, &body)
    }
}

// ============================================================================
// Cached Provider
// ============================================================================

/// Wraps a provider with a TTL cache of non-empty histories.
pub struct CachedHistoryProvider<P> {
    inner: P,
    cache: TtlCache<Vec<Candle>>,
}

impl<P: PriceHistoryProvider> CachedHistoryProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new("price-history", ttl),
        }
    }
}

#[async_trait]
impl<P: PriceHistoryProvider> PriceHistoryProvider for CachedHistoryProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn fetch_history(&self, symbol: &str) -> Result<Vec<Candle>, ProviderError> {
        if let Some(candles) = self.cache.get(symbol) {
            return Ok(candles);
        }

        let candles = self.inner.fetch_history(symbol).await?;
        if !candles.is_empty() {
            self.cache.set(symbol, candles.clone());
        }
        Ok(candles)
    }

    async fn warm_up(&self, symbols: &[String]) -> usize {
        let mut loaded = 0;
        for symbol in symbols {
            match self.fetch_history(symbol).await {
                Ok(candles) if !candles.is_empty() => loaded += 1,
                Ok(_) => debug!(symbol = %symbol, "No history during warm-up"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Warm-up fetch failed"),
            }
        }

        info!(
            requested = symbols.len(),
            loaded,
            "Price history warm-up complete"
        );
        loaded
    }

    fn clear_expired(&self) -> usize {
        self.cache.clear_expired()
    }
}

// ============================================================================
// Tests
// ============================================================================
