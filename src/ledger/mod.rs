use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Position direction. Only `Short` is produced by the entry path today,
/// but every piece of price math branches on this tag so long support can
/// never be silently wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Short,
    Long,
}

impl Default for Side {
    fn default() -> Self {
        Side::Short
    }
}

/// One active Martingale sequence for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    #[serde(default)]
    pub side: Side,
    /// Current rung, 1-based. Monotonically non-decreasing until the
    /// record is deleted on full close.
    pub step: u32,
    /// Volume-weighted average fill price.
    pub entry_price: f64,
    /// Total base-asset size, always >= 0.
    pub quantity: f64,
    /// Cumulative quote-asset margin committed.
    pub total_margin: f64,
    /// Cached trigger for the next rung; advisory, recomputed on change.
    #[serde(default)]
    pub next_step_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    /// Timestamp of the most recent step fill.
    pub last_add_time: DateTime<Utc>,
}

impl Position {
    /// Unrealized PnL in quote asset at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Short => (self.entry_price - price) * self.quantity,
            Side::Long => (price - self.entry_price) * self.quantity,
        }
    }

    /// Blend a new fill into the position: volume-weighted entry price,
    /// accumulated quantity and margin, step advanced by one.
    pub fn apply_fill(&mut self, fill_price: f64, quantity: f64, margin: f64, now: DateTime<Utc>) {
        let old_notional = self.entry_price * self.quantity;
        let new_notional = fill_price * quantity;
        let total_quantity = self.quantity + quantity;

        if total_quantity > 0.0 {
            self.entry_price = (old_notional + new_notional) / total_quantity;
        }
        self.quantity = total_quantity;
        self.total_margin += margin;
        self.step += 1;
        self.last_add_time = now;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The state file exists but cannot be decoded. Fatal at startup:
    /// silently starting empty could duplicate real-money positions.
    #[error("corrupt state file {path}: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file i/o: {0}")]
    Io(#[from] io::Error),

    #[error("state serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable, concurrency-safe owner of the symbol -> Position map.
///
/// Every mutation is written through to disk before it returns, so a crash
/// after a successful call never loses the update. The backing file is the
/// full map as pretty-printed JSON, replaced atomically (temp file +
/// rename) so a torn write can never corrupt the previous state.
#[derive(Debug)]
pub struct PositionLedger {
    path: PathBuf,
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionLedger {
    /// Load persisted state. A missing file is a clean start; malformed
    /// content is `CorruptState` and must halt startup.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let positions = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                LedgerError::CorruptState {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            positions: RwLock::new(positions),
        })
    }

    /// Insert or replace the record for `position.symbol` and persist.
    pub fn upsert(&self, position: Position) -> Result<(), LedgerError> {
        let mut map = self.positions.write();
        map.insert(position.symbol.clone(), position);
        Self::persist(&self.path, &map)
    }

    /// Delete the record and persist. Removing an absent symbol is a no-op.
    pub fn remove(&self, symbol: &str) -> Result<(), LedgerError> {
        let mut map = self.positions.write();
        if map.remove(symbol).is_none() {
            return Ok(());
        }
        Self::persist(&self.path, &map)
    }

    /// Point-in-time copy of all positions, independent of later mutation.
    pub fn snapshot(&self) -> Vec<Position> {
        let map = self.positions.read();
        let mut positions: Vec<Position> = map.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.read().contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    /// Write the full map to a sibling temp file, then rename over the
    /// target. Called with the write lock held so persisted state always
    /// matches the in-memory map.
    fn persist(path: &Path, map: &HashMap<String, Position>) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(map)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Side::Short,
            step: 2,
            entry_price: 1.25,
            quantity: 48.0,
            total_margin: 20.0,
            next_step_price: Some(1.275),
            stop_loss: None,
            take_profit: Some(1.23),
            last_add_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_file_is_clean_start() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PositionLedger::load(dir.path().join("positions.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, b"{not json").unwrap();

        match PositionLedger::load(&path) {
            Err(LedgerError::CorruptState { .. }) => {}
            other => panic!("expected CorruptState, got {other:?}"),
        }
    }

    #[test]
    fn upsert_persists_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let ledger = PositionLedger::load(&path).unwrap();
        ledger.upsert(sample_position("XYZUSDT")).unwrap();
        ledger.upsert(sample_position("ABCUSDT")).unwrap();
        let before = ledger.snapshot();
        drop(ledger);

        // Simulated restart
        let reloaded = PositionLedger::load(&path).unwrap();
        assert_eq!(reloaded.snapshot(), before);
    }

    #[test]
    fn remove_absent_symbol_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PositionLedger::load(dir.path().join("positions.json")).unwrap();
        assert!(ledger.remove("NOPEUSDT").is_ok());
    }

    #[test]
    fn remove_deletes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let ledger = PositionLedger::load(&path).unwrap();
        ledger.upsert(sample_position("XYZUSDT")).unwrap();
        ledger.remove("XYZUSDT").unwrap();
        assert!(ledger.is_empty());

        let reloaded = PositionLedger::load(&path).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PositionLedger::load(dir.path().join("positions.json")).unwrap();
        ledger.upsert(sample_position("XYZUSDT")).unwrap();

        let snap = ledger.snapshot();
        ledger.remove("XYZUSDT").unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].symbol, "XYZUSDT");
    }

    #[test]
    fn apply_fill_blends_volume_weighted_entry() {
        let mut pos = sample_position("XYZUSDT");
        pos.step = 1;
        pos.entry_price = 100.0;
        pos.quantity = 1.0;
        pos.total_margin = 10.0;

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        pos.apply_fill(110.0, 1.0, 10.0, now);

        assert_eq!(pos.step, 2);
        assert!((pos.entry_price - 105.0).abs() < 1e-9);
        assert!((pos.quantity - 2.0).abs() < 1e-9);
        assert!((pos.total_margin - 20.0).abs() < 1e-9);
        assert_eq!(pos.last_add_time, now);
    }

    #[test]
    fn short_pnl_gains_when_price_falls() {
        let mut pos = sample_position("XYZUSDT");
        pos.entry_price = 100.0;
        pos.quantity = 2.0;

        assert!((pos.unrealized_pnl(95.0) - 10.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl(105.0) + 10.0).abs() < 1e-9);

        pos.side = Side::Long;
        assert!((pos.unrealized_pnl(105.0) - 10.0).abs() < 1e-9);
    }
}
