//! Margin reference table and named scan strategies.
//!
//! Both are snapshots of a backing [`ReferenceSource`] held in never-expiring
//! caches. A reload replaces a whole cache in one step; readers see either
//! the old snapshot or the new one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::data::{MarginEntry, ScanDefinition, TtlCache};
use crate::zones::StoreError;

/// Symbol → margin entry, never expires
pub type MarginCache = TtlCache<MarginEntry>;

/// Strategy name → scan definition, never expires
pub type StrategyCache = TtlCache<ScanDefinition>;

/// Backing store for reference snapshots.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn load_margins(&self) -> Result<Vec<MarginEntry>, StoreError>;

    async fn load_strategies(&self) -> Result<Vec<ScanDefinition>, StoreError>;

    /// Insert or replace one strategy by name.
    async fn save_strategy(&self, definition: &ScanDefinition) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: ReferenceSource + ?Sized> ReferenceSource for Arc<S> {
    async fn load_margins(&self) -> Result<Vec<MarginEntry>, StoreError> {
        (**self).load_margins().await
    }

    async fn load_strategies(&self) -> Result<Vec<ScanDefinition>, StoreError> {
        (**self).load_strategies().await
    }

    async fn save_strategy(&self, definition: &ScanDefinition) -> Result<(), StoreError> {
        (**self).save_strategy(definition).await
    }
}

/// In-memory reference source.
#[derive(Debug, Default)]
pub struct MemoryReferenceSource {
    margins: RwLock<Vec<MarginEntry>>,
    strategies: RwLock<HashMap<String, ScanDefinition>>,
}

impl MemoryReferenceSource {
    pub fn new(margins: Vec<MarginEntry>, strategies: Vec<ScanDefinition>) -> Self {
        Self {
            margins: RwLock::new(margins),
            strategies: RwLock::new(
                strategies
                    .into_iter()
                    .map(|s| (s.name.clone(), s))
                    .collect(),
            ),
        }
    }

    pub async fn set_margins(&self, margins: Vec<MarginEntry>) {
        *self.margins.write().await = margins;
    }
}

#[async_trait]
impl ReferenceSource for MemoryReferenceSource {
    async fn load_margins(&self) -> Result<Vec<MarginEntry>, StoreError> {
        Ok(self.margins.read().await.clone())
    }

    async fn load_strategies(&self) -> Result<Vec<ScanDefinition>, StoreError> {
        Ok(self.strategies.read().await.values().cloned().collect())
    }

    async fn save_strategy(&self, definition: &ScanDefinition) -> Result<(), StoreError> {
        self.strategies
            .write()
            .await
            .insert(definition.name.clone(), definition.clone());
        Ok(())
    }
}

/// Cached view over a [`ReferenceSource`].
pub struct ReferenceData {
    source: Arc<dyn ReferenceSource>,
    margins: MarginCache,
    strategies: StrategyCache,
}

impl ReferenceData {
    /// Empty caches; call [`reload_all`](Self::reload_all) to populate.
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            source,
            margins: MarginCache::unbounded("margins"),
            strategies: StrategyCache::unbounded("strategies"),
        }
    }

    /// Flush and repopulate the margin cache. Returns the entry count.
    pub async fn reload_margins(&self) -> Result<usize, StoreError> {
        let entries = self.source.load_margins().await?;
        let count = self
            .margins
            .replace_all(entries.into_iter().map(|m| (m.symbol.clone(), m)));
        info!(count, "Reloaded margin reference");
        Ok(count)
    }

    /// Flush and repopulate the strategy cache. Returns the entry count.
    pub async fn reload_strategies(&self) -> Result<usize, StoreError> {
        let definitions = self.source.load_strategies().await?;
        let count = self
            .strategies
            .replace_all(definitions.into_iter().map(|s| (s.name.clone(), s)));
        info!(count, "Reloaded strategies");
        Ok(count)
    }

    /// Reload both caches; returns (margins, strategies).
    pub async fn reload_all(&self) -> Result<(usize, usize), StoreError> {
        let margins = self.reload_margins().await?;
        let strategies = self.reload_strategies().await?;
        Ok((margins, strategies))
    }

    pub fn margin(&self, symbol: &str) -> Option<MarginEntry> {
        self.margins.get(symbol)
    }

    /// Look up a strategy by name.
    pub fn resolve(&self, name: &str) -> Option<ScanDefinition> {
        self.strategies.get(name)
    }

    /// Persist one strategy, then refresh its cache entry.
    pub async fn upsert_strategy(&self, definition: ScanDefinition) -> Result<(), StoreError> {
        self.source.save_strategy(&definition).await?;
        debug!(strategy = %definition.name, "Saved strategy");
        self.strategies.set(definition.name.clone(), definition);
        Ok(())
    }

    pub fn margin_cache(&self) -> &MarginCache {
        &self.margins
    }

    pub fn strategy_cache(&self) -> &StrategyCache {
        &self.strategies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn margin(symbol: &str, multiple: f64) -> MarginEntry {
        MarginEntry {
            symbol: symbol.to_string(),
            name: format!("{} Ltd", symbol),
            margin_multiple: multiple,
        }
    }

    #[tokio::test]
    async fn test_reload_replaces_wholesale() {
        let source = Arc::new(MemoryReferenceSource::new(
            vec![margin("INFY", 5.0), margin("TCS", 4.0)],
            vec![],
        ));
        let reference = ReferenceData::new(source.clone());

        assert_eq!(reference.reload_margins().await.unwrap(), 2);
        assert_eq!(reference.margin("TCS").unwrap().margin_multiple, 4.0);

        source.set_margins(vec![margin("INFY", 3.0)]).await;
        assert_eq!(reference.reload_margins().await.unwrap(), 1);
        assert!(reference.margin("TCS").is_none());
        assert_eq!(reference.margin("INFY").unwrap().margin_multiple, 3.0);

        // Idempotent
        assert_eq!(reference.reload_margins().await.unwrap(), 1);
        assert_eq!(reference.margin_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_and_upsert_strategy() {
        let source = Arc::new(MemoryReferenceSource::new(
            vec![],
            vec![ScanDefinition::new("breakout", "( close > 1 )")],
        ));
        let reference = ReferenceData::new(source.clone());

        assert!(reference.resolve("breakout").is_none());
        reference.reload_all().await.unwrap();
        assert_eq!(reference.resolve("breakout").unwrap().clause, "( close > 1 )");

        reference
            .upsert_strategy(ScanDefinition::new("gap-up", "( open > 2 )"))
            .await
            .unwrap();
        assert!(reference.resolve("gap-up").is_some());
        assert_eq!(source.load_strategies().await.unwrap().len(), 2);
        assert!(reference.resolve("missing").is_none());
    }
}
