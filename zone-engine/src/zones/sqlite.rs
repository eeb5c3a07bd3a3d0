//! SQLite-backed zone and reference store.
//!
//! One database file holds three tables: `zones` keyed by
//! (symbol, kind, date), `margins` keyed by symbol and `strategies` keyed by
//! name. Dates are stored as ISO `YYYY-MM-DD` text so lexical order matches
//! date order.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zone_common::config::StorageConfig;

use super::{StoreError, SymbolZones, Zone, ZoneKind, ZoneStore};
use crate::data::{MarginEntry, ScanDefinition};
use crate::reference::ReferenceSource;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS zones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    date TEXT NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, kind, date)
);

CREATE INDEX IF NOT EXISTS idx_zones_symbol_kind_date
ON zones(symbol, kind, date DESC);

CREATE TABLE IF NOT EXISTS margins (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    margin_multiple REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS strategies (
    name TEXT PRIMARY KEY,
    clause TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

const ISO_DATE: &str = "%Y-%m-%d";

/// Raw zone row before date parsing.
type ZoneRow = (String, String, String, f64, f64);

/// SQLite store for zones, margins and strategies.
pub struct SqliteZoneStore {
    /// rusqlite::Connection is Send but not Sync
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteZoneStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;

        info!(db_path = %path.display(), "Initialized zone store");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        Self::open(&config.db_path)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Replace the whole margin table; returns the number of rows written.
    pub async fn replace_margins(&self, entries: &[MarginEntry]) -> Result<usize, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM margins", [])?;
        for entry in entries {
            tx.execute(
                "INSERT OR REPLACE INTO margins (symbol, name, margin_multiple) VALUES (?1, ?2, ?3)",
                params![entry.symbol, entry.name, entry.margin_multiple],
            )?;
        }
        tx.commit()?;

        debug!(count = entries.len(), "Replaced margin table");
        Ok(entries.len())
    }

    fn row_to_zone(row: ZoneRow) -> Result<(ZoneKind, Zone), StoreError> {
        let (symbol, kind, date, high, low) = row;
        let kind: ZoneKind = kind.parse().map_err(StoreError::Corrupt)?;
        let date = NaiveDate::parse_from_str(&date, ISO_DATE)
            .map_err(|e| StoreError::Corrupt(format!("zone date {}: {}", date, e)))?;
        Ok((kind, Zone::new(symbol, date, high, low)))
    }

    fn group(rows: Vec<ZoneRow>) -> Result<HashMap<String, SymbolZones>, StoreError> {
        let mut grouped: HashMap<String, SymbolZones> = HashMap::new();
        for row in rows {
            let (kind, zone) = Self::row_to_zone(row)?;
            grouped
                .entry(zone.symbol.clone())
                .or_insert_with(|| SymbolZones::new(zone.symbol.clone()))
                .upsert(kind, zone);
        }
        Ok(grouped)
    }
}

fn read_zone_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ZoneRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[async_trait]
impl ZoneStore for SqliteZoneStore {
    async fn find_zones_for_symbols(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolZones>, StoreError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; symbols.len()].join(", ");
        let sql = format!(
            "SELECT symbol, kind, date, high, low FROM zones WHERE symbol IN ({}) ORDER BY date DESC",
            placeholders
        );

        let rows = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(symbols.iter()), read_zone_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Self::group(rows)
    }

    async fn upsert_zone(&self, kind: ZoneKind, zone: Zone) -> Result<(), StoreError> {
        let date = zone.date.format(ISO_DATE).to_string();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM zones WHERE symbol = ?1 AND kind = ?2 AND date = ?3",
            params![zone.symbol, kind.as_str(), date],
        )?;
        tx.execute(
            "INSERT INTO zones (symbol, kind, date, high, low) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![zone.symbol, kind.as_str(), date, zone.high, zone.low],
        )?;
        tx.commit()?;

        debug!(symbol = %zone.symbol, %kind, %date, "Upserted zone");
        Ok(())
    }

    async fn delete_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM zones WHERE symbol = ?1 AND kind = ?2 AND date = ?3",
            params![symbol, kind.as_str(), date.format(ISO_DATE).to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn update_zone(
        &self,
        kind: ZoneKind,
        symbol: &str,
        date: NaiveDate,
        high: f64,
        low: f64,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE zones SET high = ?1, low = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE symbol = ?3 AND kind = ?4 AND date = ?5",
            params![high, low, symbol, kind.as_str(), date.format(ISO_DATE).to_string()],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound {
                kind,
                symbol: symbol.to_string(),
                date,
            });
        }
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<SymbolZones>, StoreError> {
        let rows = {
            let db = self.db.lock().await;
            let mut stmt =
                db.prepare("SELECT symbol, kind, date, high, low FROM zones ORDER BY date DESC")?;
            let rows = stmt
                .query_map([], read_zone_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut all: Vec<SymbolZones> = Self::group(rows)?.into_values().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}

#[async_trait]
impl ReferenceSource for SqliteZoneStore {
    async fn load_margins(&self) -> Result<Vec<MarginEntry>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT symbol, name, margin_multiple FROM margins")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MarginEntry {
                    symbol: row.get(0)?,
                    name: row.get(1)?,
                    margin_multiple: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn load_strategies(&self) -> Result<Vec<ScanDefinition>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT name, clause FROM strategies")?;
        let rows = stmt
            .query_map([], |row| Ok(ScanDefinition::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn save_strategy(&self, definition: &ScanDefinition) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO strategies (name, clause) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET clause = excluded.clause, updated_at = CURRENT_TIMESTAMP",
            params![definition.name, definition.clause],
        )?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
