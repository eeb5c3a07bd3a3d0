//! In-memory zone store.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StoreError, SymbolZones, Zone, ZoneKind, ZoneStore};

/// Zone store backed by a map; every write runs under one exclusive lock.
#[derive(Debug, Default)]
pub struct MemoryZoneStore {
    zones: RwLock<HashMap<String, SymbolZones>>,
}

impl MemoryZoneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ZoneStore for MemoryZoneStore {
    async fn find_zones_for_symbols(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolZones>, StoreError> {
        let zones = self.zones.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| zones.get(s).map(|z| (s.clone(), z.clone())))
            .filter(|(_, z)| !z.is_empty())
            .collect())
    }

    async fn upsert_zone(&self, kind: ZoneKind, zone: Zone) -> Result<(), StoreError> {
        let mut zones = self.zones.write().await;
        zones
            .entry(zone.symbol.clone())
            .or_insert_with(|| SymbolZones::new(zone.symbol.clone()))
            .upsert(kind, zone);
        Ok(())
    }

    async fn delete_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let mut zones = self.zones.write().await;
        Ok(zones
            .get_mut(symbol)
            .map(|z| z.remove(kind, date))
            .unwrap_or(false))
    }

    async fn update_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
        high: f64,
        low: f64,
    ) -> Result<(), StoreError> {
        let mut zones = self.zones.write().await;
        let updated = zones
            .get_mut(symbol)
            .map(|z| z.update(kind, date, high, low))
            .unwrap_or(false);

        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind,
                symbol: symbol.to_string(),
                date,
            })
        }
    }

    async fn find_all(&self) -> Result<Vec<SymbolZones>, StoreError> {
        let zones = self.zones.read().await;
        let mut all: Vec<SymbolZones> = zones.values().filter(|z| !z.is_empty()).cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}
