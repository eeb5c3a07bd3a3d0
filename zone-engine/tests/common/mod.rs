//! Spy and stub collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use zone_engine::data::{
    Candle, MarginEntry, PriceHistoryProvider, ProviderError, ScanCandidate, ScanDefinition,
};
use zone_engine::engine::MitigationEngine;
use zone_engine::reference::{MemoryReferenceSource, ReferenceData};
use zone_engine::scanner::{ScanSource, ScannerError};
use zone_engine::zones::{MemoryZoneStore, StoreError, SymbolZones, Zone, ZoneKind, ZoneStore};

// ============================================================================
// Scanner
// ============================================================================

/// Scanner returning a fixed candidate list (or error) and counting calls.
pub struct SpyScanner {
    pub calls: AtomicU32,
    candidates: Vec<ScanCandidate>,
    fail: bool,
}

impl SpyScanner {
    pub fn new(symbols: &[&str]) -> Self {
        Self {
            calls: AtomicU32::new(0),
            candidates: symbols.iter().map(|s| candidate(s)).collect(),
            fail: false,
        }
    }

    pub fn with_candidates(candidates: Vec<ScanCandidate>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            candidates,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            candidates: Vec::new(),
            fail: true,
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ScanSource for SpyScanner {
    async fn fetch_candidates(&self, _clause: &str) -> Result<Vec<ScanCandidate>, ScannerError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            Err(ScannerError::Status { code: 503 })
        } else {
            Ok(self.candidates.clone())
        }
    }
}

pub fn candidate(symbol: &str) -> ScanCandidate {
    ScanCandidate {
        symbol: symbol.to_string(),
        display_name: format!("{} (scanner)", symbol),
        last_close: 100.0,
    }
}

// ============================================================================
// Price History
// ============================================================================

/// History provider backed by a per-symbol table. Unknown symbols have no
/// data. Optionally cancels a token once `cancel_after` calls were served.
#[derive(Default)]
pub struct StubHistory {
    pub calls: AtomicU32,
    histories: Mutex<HashMap<String, Result<Vec<Candle>, ProviderError>>>,
    cancel_after: Option<(u32, CancellationToken)>,
}

impl StubHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_after(calls: u32, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((calls, token)),
            ..Self::default()
        }
    }

    pub fn set(&self, symbol: &str, candles: Vec<Candle>) {
        self.histories
            .lock()
            .unwrap()
            .insert(symbol.to_string(), Ok(candles));
    }

    pub fn fail(&self, symbol: &str) {
        self.histories.lock().unwrap().insert(
            symbol.to_string(),
            Err(ProviderError::Network("mock network failure".into())),
        );
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceHistoryProvider for StubHistory {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn fetch_history(&self, symbol: &str) -> Result<Vec<Candle>, ProviderError> {
        let served = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if served >= *limit {
                token.cancel();
            }
        }

        self.histories
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn candle(symbol: &str, high: f64, low: f64, close: f64, timestamp: &str) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        open: low,
        high,
        low,
        close,
        timestamp: timestamp.to_string(),
    }
}

// ============================================================================
// Zone Store
// ============================================================================

/// Store whose writes always fail; reads are empty.
pub struct FailingStore;

#[async_trait]
impl ZoneStore for FailingStore {
    async fn find_zones_for_symbols(
        &self,
        _symbols: &[String],
    ) -> Result<HashMap<String, SymbolZones>, StoreError> {
        Ok(HashMap::new())
    }

    async fn upsert_zone(&self, _kind: ZoneKind, _zone: Zone) -> Result<(), StoreError> {
        Err(StoreError::Corrupt("disk full".into()))
    }

    async fn delete_zone(
        &self,
        _kind: ZoneKind,
        _symbol: &str,
        _date: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn update_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
        _high: f64,
        _low: f64,
    ) -> Result<(), StoreError> {
        Err(StoreError::NotFound {
            kind,
            symbol: symbol.to_string(),
            date,
        })
    }

    async fn find_all(&self) -> Result<Vec<SymbolZones>, StoreError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Engine Assembly
// ============================================================================

pub const STRATEGY: &str = "swing-reclaim";

pub fn margin(symbol: &str, multiple: f64) -> MarginEntry {
    MarginEntry {
        symbol: symbol.to_string(),
        name: format!("{} Ltd", symbol),
        margin_multiple: multiple,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Reference data with `margins` and `strategies` already loaded.
pub async fn loaded_reference(
    margins: Vec<MarginEntry>,
    strategies: Vec<ScanDefinition>,
) -> Arc<ReferenceData> {
    let source = Arc::new(MemoryReferenceSource::new(margins, strategies));
    let reference = Arc::new(ReferenceData::new(source));
    reference.reload_all().await.unwrap();
    reference
}

/// Engine over the given collaborators with `strategies` and `margins`
/// already loaded.
pub async fn engine_with(
    scanner: Arc<SpyScanner>,
    history: Arc<StubHistory>,
    store: Arc<dyn ZoneStore>,
    margins: Vec<MarginEntry>,
    strategies: Vec<ScanDefinition>,
) -> MitigationEngine {
    let reference = loaded_reference(margins, strategies).await;
    MitigationEngine::new(scanner, history, store, reference)
}

/// Engine with one strategy named [`STRATEGY`] and an in-memory store.
pub async fn default_engine(
    scanner: Arc<SpyScanner>,
    history: Arc<StubHistory>,
    store: Arc<MemoryZoneStore>,
    margins: Vec<MarginEntry>,
) -> MitigationEngine {
    engine_with(
        scanner,
        history,
        store,
        margins,
        vec![ScanDefinition::new(STRATEGY, "( close > 10 )")],
    )
    .await
}
