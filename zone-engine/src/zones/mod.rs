//! Price zones and their persistence.
//!
//! A zone is a (high, low) band recorded for a symbol on a date. Each symbol
//! keeps two collections, order blocks and fair value gaps, both ordered by
//! date descending. The ordering is established at insert time by
//! [`SymbolZones::upsert`]; no store re-sorts on read.

mod memory;
mod sqlite;

pub use memory::MemoryZoneStore;
pub use sqlite::SqliteZoneStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Zone Types
// ============================================================================

/// Which zone collection an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    OrderBlock,
    FairValueGap,
}

impl ZoneKind {
    pub const ALL: [ZoneKind; 2] = [ZoneKind::OrderBlock, ZoneKind::FairValueGap];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderBlock => "order_block",
            Self::FairValueGap => "fair_value_gap",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order_block" | "orderblock" | "ob" => Ok(Self::OrderBlock),
            "fair_value_gap" | "fairvaluegap" | "fvg" => Ok(Self::FairValueGap),
            other => Err(format!("unknown zone kind: {}", other)),
        }
    }
}

/// A recorded price zone. Identity is (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub symbol: String,
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
}

impl Zone {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, high: f64, low: f64) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            high,
            low,
        }
    }
}

/// All zones recorded for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolZones {
    pub symbol: String,
    /// Date descending
    pub order_blocks: Vec<Zone>,
    /// Date descending
    pub fair_value_gaps: Vec<Zone>,
}

impl SymbolZones {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Zones of one kind, most recent first.
    pub fn zones(&self, kind: ZoneKind) -> &[Zone] {
        match kind {
            ZoneKind::OrderBlock => &self.order_blocks,
            ZoneKind::FairValueGap => &self.fair_value_gaps,
        }
    }

    fn zones_mut(&mut self, kind: ZoneKind) -> &mut Vec<Zone> {
        match kind {
            ZoneKind::OrderBlock => &mut self.order_blocks,
            ZoneKind::FairValueGap => &mut self.fair_value_gaps,
        }
    }

    /// Replace any zone on the same date, then insert at the position that
    /// keeps the collection date-descending.
    pub fn upsert(&mut self, kind: ZoneKind, zone: Zone) {
        let zones = self.zones_mut(kind);
        zones.retain(|z| z.date != zone.date);
        let pos = zones
            .iter()
            .position(|z| z.date < zone.date)
            .unwrap_or(zones.len());
        zones.insert(pos, zone);
    }

    /// Remove the zone on `date`; returns whether one existed.
    pub fn remove(&mut self, kind: ZoneKind, date: NaiveDate) -> bool {
        let zones = self.zones_mut(kind);
        let before = zones.len();
        zones.retain(|z| z.date != date);
        zones.len() != before
    }

    /// Replace high/low of the zone on `date`; returns whether one existed.
    pub fn update(&mut self, kind: ZoneKind, date: NaiveDate, high: f64, low: f64) -> bool {
        match self.zones_mut(kind).iter_mut().find(|z| z.date == date) {
            Some(zone) => {
                zone.high = high;
                zone.low = low;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order_blocks.is_empty() && self.fair_value_gaps.is_empty()
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Errors from a zone or reference store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("No {kind} zone for {symbol} on {date}")]
    NotFound {
        kind: ZoneKind,
        symbol: String,
        date: NaiveDate,
    },
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence for zones.
///
/// `upsert_zone` must be atomic with respect to other writers of the same
/// symbol: the same-date removal and the insert happen as one operation.
#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Zones for each requested symbol that has any. Symbols without zones
    /// are absent from the map.
    async fn find_zones_for_symbols(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolZones>, StoreError>;

    /// Insert a zone, replacing any zone of the same kind on the same date.
    async fn upsert_zone(&self, kind: ZoneKind, zone: Zone) -> Result<(), StoreError>;

    /// Delete the zone on `date`; returns whether one existed.
    async fn delete_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Replace high/low of an existing zone.
    async fn update_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
        high: f64,
        low: f64,
    ) -> Result<(), StoreError>;

    /// Every symbol's zones.
    async fn find_all(&self) -> Result<Vec<SymbolZones>, StoreError>;
}

#[async_trait]
impl<S: ZoneStore + ?Sized> ZoneStore for Arc<S> {
    async fn find_zones_for_symbols(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolZones>, StoreError> {
        (**self).find_zones_for_symbols(symbols).await
    }

    async fn upsert_zone(&self, kind: ZoneKind, zone: Zone) -> Result<(), StoreError> {
        (**self).upsert_zone(kind, zone).await
    }

    async fn delete_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        (**self).delete_zone(kind, symbol, date).await
    }

    async fn update_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
        high: f64,
        low: f64,
    ) -> Result<(), StoreError> {
        (**self).update_zone(kind, symbol, date, high, low).await
    }

    async fn find_all(&self) -> Result<Vec<SymbolZones>, StoreError> {
        (**self).find_all().await
    }
}

// ============================================================================
// Tests
// ============================================================================
