//! Durable session-position store with retention and golden-angle
//! auto-placement.
//!
//! Positions live in one JSON object file keyed
//! `"<namespace>:position:<session_key>"`. The store owns every record
//! exclusively; collaborators only ever see normalized coordinates.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use glam::Vec2;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::params::{bounds, StoreConfig};

/// Golden angle in degrees; successive auto-placed points spread evenly
/// with no two overlapping for small indices.
const GOLDEN_ANGLE_DEG: f32 = 137.5;

/// One persisted position record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

/// Durable mapping from session key to normalized position
pub struct PositionStore {
    config: StoreConfig,
    records: BTreeMap<String, PositionRecord>,
}

impl PositionStore {
    /// Open the store: load the backing file, silently skipping entries
    /// that fail to parse, then evict anything older than the retention
    /// window. A missing or unreadable file yields an empty store.
    pub fn open(config: StoreConfig) -> Self {
        let mut store = Self {
            config,
            records: BTreeMap::new(),
        };
        store.load();
        store
    }

    /// Saved position for `key`, or a deterministic auto-assigned one
    /// seeded by `fallback_index` (not persisted until `save`).
    pub fn get(&self, key: &str, fallback_index: usize) -> Vec2 {
        self.records
            .get(key)
            .map(|r| Vec2::new(r.x, r.y))
            .unwrap_or_else(|| auto_assign(fallback_index))
    }

    /// Upsert the record for `key` with the current time. Re-saving the
    /// same value skips the disk write.
    pub fn save(&mut self, key: &str, x: f32, y: f32) {
        if let Some(existing) = self.records.get(key) {
            if existing.x == x && existing.y == y {
                return;
            }
        }
        self.records.insert(
            key.to_string(),
            PositionRecord {
                x,
                y,
                saved_at: Utc::now(),
            },
        );
        self.persist();
    }

    /// Delete every record this store owns.
    pub fn reset_all(&mut self) {
        self.records.clear();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    fn file_key(&self, key: &str) -> String {
        format!("{}:position:{}", self.config.namespace, key)
    }

    fn load(&mut self) {
        let raw = match fs::read_to_string(&self.config.path) {
            Ok(raw) => raw,
            Err(_) => return, // first run, nothing saved yet
        };
        let root: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("position file unreadable, starting empty: {}", e);
                return;
            }
        };
        let Some(entries) = root.as_object() else {
            warn!("position file is not an object, starting empty");
            return;
        };

        let prefix = format!("{}:position:", self.config.namespace);
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let mut evicted = 0usize;

        for (file_key, value) in entries {
            let Some(key) = file_key.strip_prefix(&prefix) else {
                continue; // foreign namespace
            };
            let record: PositionRecord = match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(e) => {
                    debug!("skipping corrupt position record for {}: {}", key, e);
                    continue;
                }
            };
            if record.saved_at < cutoff {
                evicted += 1;
                continue;
            }
            self.records.insert(key.to_string(), record);
        }

        if evicted > 0 {
            debug!("evicted {} expired position records", evicted);
            self.persist();
        }
    }

    fn persist(&self) {
        let mut root = serde_json::Map::new();
        for (key, record) in &self.records {
            match serde_json::to_value(record) {
                Ok(v) => {
                    root.insert(self.file_key(key), v);
                }
                Err(e) => warn!("failed to serialize record for {}: {}", key, e),
            }
        }
        if let Some(parent) = self.config.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("failed to create data dir {:?}: {}", parent, e);
                return;
            }
        }
        if let Err(e) = write_atomic(&self.config.path, &serde_json::Value::Object(root)) {
            // Persistence failure degrades to "positions didn't save",
            // never interrupts the event pipeline.
            warn!("failed to write position file: {}", e);
        }
    }
}

fn write_atomic(path: &Path, value: &serde_json::Value) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Deterministic placement for the nth session seen without a saved
/// position. Index 0 sits at the listener; later indices walk outward on
/// golden-angle spokes over widening rings.
pub fn auto_assign(index: usize) -> Vec2 {
    if index == 0 {
        return Vec2::new(0.5, 0.5);
    }
    let n = index as f32;
    let angle = (n * GOLDEN_ANGLE_DEG).to_radians();
    let ring = n.sqrt().ceil();
    let radius = 0.15 + ring * 0.1;
    Vec2::new(
        (0.5 + angle.cos() * radius).clamp(bounds::AUTO_MIN, bounds::AUTO_MAX),
        (0.5 + angle.sin() * radius).clamp(bounds::AUTO_MIN, bounds::AUTO_MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StoreConfig;
    use std::path::PathBuf;

    fn test_config(dir: &Path) -> StoreConfig {
        StoreConfig {
            namespace: "echofield".to_string(),
            retention_days: 30,
            path: dir.join("positions.json"),
        }
    }

    #[test]
    fn test_auto_assign_center_and_determinism() {
        assert_eq!(auto_assign(0), Vec2::new(0.5, 0.5));
        for n in 0..50 {
            assert_eq!(auto_assign(n), auto_assign(n));
        }
    }

    #[test]
    fn test_auto_assign_bounds() {
        for n in 1..200 {
            let p = auto_assign(n);
            assert!(p.x >= 0.1 && p.x <= 0.9, "x out of bounds at {}: {}", n, p.x);
            assert!(p.y >= 0.1 && p.y <= 0.9, "y out of bounds at {}: {}", n, p.y);
        }
    }

    #[test]
    fn test_auto_assign_second_session() {
        // index 1: angle 137.5°, ring 1, radius 0.25
        let angle = 137.5_f32.to_radians();
        let expected = Vec2::new(0.5 + angle.cos() * 0.25, 0.5 + angle.sin() * 0.25);
        let got = auto_assign(1);
        assert!((got - expected).length() < 1e-6);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PositionStore::open(test_config(dir.path()));
        store.save("k", 0.3, 0.7);
        assert_eq!(store.get("k", 99), Vec2::new(0.3, 0.7));

        // Survives a reopen
        let store = PositionStore::open(test_config(dir.path()));
        assert_eq!(store.get("k", 99), Vec2::new(0.3, 0.7));
    }

    #[test]
    fn test_get_falls_back_to_auto_assign() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::open(test_config(dir.path()));
        assert_eq!(store.get("unseen", 0), Vec2::new(0.5, 0.5));
        assert_eq!(store.get("unseen", 3), auto_assign(3));
    }

    #[test]
    fn test_retention_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let fresh = Utc::now() - Duration::days(29);
        let stale = Utc::now() - Duration::days(31);
        let raw = format!(
            r#"{{
              "echofield:position:fresh": {{"x": 0.4, "y": 0.4, "savedAt": "{}"}},
              "echofield:position:stale": {{"x": 0.6, "y": 0.6, "savedAt": "{}"}}
            }}"#,
            fresh.to_rfc3339(),
            stale.to_rfc3339()
        );
        fs::write(&path, raw).unwrap();

        let store = PositionStore::open(test_config(dir.path()));
        assert!(store.contains("fresh"));
        assert!(!store.contains("stale"));

        // Eviction also rewrote the backing file
        let reread = fs::read_to_string(&path).unwrap();
        assert!(!reread.contains("stale"));
    }

    #[test]
    fn test_corrupt_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let raw = format!(
            r#"{{
              "echofield:position:good": {{"x": 0.2, "y": 0.8, "savedAt": "{}"}},
              "echofield:position:bad": {{"x": "nope"}},
              "echofield:position:worse": 17
            }}"#,
            Utc::now().to_rfc3339()
        );
        fs::write(&path, raw).unwrap();

        let store = PositionStore::open(test_config(dir.path()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("good", 0), Vec2::new(0.2, 0.8));
    }

    #[test]
    fn test_reset_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PositionStore::open(test_config(dir.path()));
        store.save("a", 0.1, 0.1);
        store.save("b", 0.9, 0.9);
        store.reset_all();
        assert!(store.is_empty());
        // After reset, get falls back to auto-assignment
        assert_eq!(store.get("a", 0), Vec2::new(0.5, 0.5));
    }

    #[test]
    fn test_save_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PositionStore::open(test_config(dir.path()));
        store.save("k", 0.5, 0.5);
        let first = fs::metadata(dir.path().join("positions.json"))
            .unwrap()
            .modified()
            .unwrap();
        store.save("k", 0.5, 0.5); // same value, no rewrite
        let second = fs::metadata(dir.path().join("positions.json"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let config = StoreConfig {
            namespace: "echofield".to_string(),
            retention_days: 30,
            path: PathBuf::from("/nonexistent/positions.json"),
        };
        let store = PositionStore::open(config);
        assert!(store.is_empty());
    }
}
