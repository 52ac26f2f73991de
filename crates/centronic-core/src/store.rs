//! Persisted unit store
//!
//! Keeps the per-unit rolling counters and pairing state in a JSON file next
//! to nothing else. Receivers track the counter of each paired unit, so a
//! lost or stale counter bricks the pairing; every counter change is written
//! back before the matching frames ever reach the gateway.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::protocol::CentronicError;

/// Store file created next to the configured path
pub const STORE_FILE: &str = "centronic-stick.json";

/// Counter file written by older installations, absorbed on first run
pub const LEGACY_NUMBER_FILE: &str = "centronic-stick.num";

const LEGACY_UNIT_CODE: &str = "1737b";

/// Unit codes seeded into a fresh store
pub const DEFAULT_UNIT_CODES: [&str; 5] = ["1737b", "1737c", "1737d", "1737e", "1737f"];

/// One transmitter unit the stick can impersonate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// 5-hex-digit unit code sent on the wire
    pub code: String,
    /// Rolling counter, one step per transmitted opcode
    pub increment: u16,
    /// Whether the unit has been paired with at least one receiver
    pub configured: bool,
    /// Unix timestamp of the last committed command
    #[serde(default)]
    pub last_executed: i64,
}

impl Unit {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            increment: 0,
            configured: false,
            last_executed: 0,
        }
    }
}

/// How a caller names a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKey {
    /// By its 5-hex-digit code
    Code(String),
    /// By its 1-based position in the store
    Index(usize),
}

/// JSON-backed collection of units
pub struct UnitStore {
    path: PathBuf,
    units: Vec<Unit>,
}

impl UnitStore {
    /// Open the store, bootstrapping the default units on first run.
    ///
    /// A fresh store also absorbs the counter file of older installations if
    /// one sits next to it; migration failures are logged and skipped rather
    /// than preventing startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CentronicError> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let units = serde_json::from_str(&raw).map_err(io::Error::other)?;
            return Ok(Self { path, units });
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut store = Self {
            path,
            units: DEFAULT_UNIT_CODES.iter().map(|&c| Unit::new(c)).collect(),
        };
        store.migrate_legacy_counter();
        store.persist()?;
        info!(path = %store.path.display(), "unit store created");
        Ok(store)
    }

    /// Pick up the counter of a pre-JSON installation, then retire its file.
    fn migrate_legacy_counter(&mut self) {
        let legacy = match self.path.parent() {
            Some(parent) => parent.join(LEGACY_NUMBER_FILE),
            None => PathBuf::from(LEGACY_NUMBER_FILE),
        };
        if !legacy.exists() {
            return;
        }

        let increment = fs::read_to_string(&legacy)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        match increment {
            Some(increment) => {
                if let Some(unit) = self.find_mut(LEGACY_UNIT_CODE) {
                    unit.increment = (increment % 0x1_0000) as u16;
                    unit.configured = true;
                    info!(
                        increment,
                        "migrated counter from {}", LEGACY_NUMBER_FILE
                    );
                }
                if let Err(e) = fs::remove_file(&legacy) {
                    warn!(error = %e, "could not remove {}", LEGACY_NUMBER_FILE);
                }
            }
            None => warn!(
                path = %legacy.display(),
                "ignoring unreadable {}", LEGACY_NUMBER_FILE
            ),
        }
    }

    fn find(&self, code: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.code.eq_ignore_ascii_case(code))
    }

    fn find_mut(&mut self, code: &str) -> Option<&mut Unit> {
        self.units
            .iter_mut()
            .find(|u| u.code.eq_ignore_ascii_case(code))
    }

    /// Look up a unit by code or 1-based index.
    pub fn get(&self, key: &UnitKey) -> Result<Unit, CentronicError> {
        match key {
            UnitKey::Code(code) => self
                .find(code)
                .cloned()
                .ok_or_else(|| CentronicError::UnknownUnit(code.clone())),
            UnitKey::Index(index) => {
                if *index == 0 {
                    return Err(CentronicError::UnknownUnit(index.to_string()));
                }
                self.units
                    .get(index - 1)
                    .cloned()
                    .ok_or_else(|| CentronicError::UnknownUnit(index.to_string()))
            }
        }
    }

    /// All paired units, ordered by code.
    pub fn get_configured(&self) -> Vec<Unit> {
        let mut units: Vec<Unit> = self.units.iter().filter(|u| u.configured).cloned().collect();
        units.sort_by(|a, b| a.code.cmp(&b.code));
        units
    }

    /// Every unit in store order.
    pub fn all(&self) -> &[Unit] {
        &self.units
    }

    /// Register a new unit code.
    pub fn add_unit(&mut self, code: &str) -> Result<(), CentronicError> {
        if code.len() != 5 || !code.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CentronicError::Configuration(format!(
                "unit code must be 5 hex digits, got {code:?}"
            )));
        }
        if self.find(code).is_some() {
            return Err(CentronicError::Configuration(format!(
                "unit {code} already exists"
            )));
        }
        self.units.push(Unit::new(code));
        self.persist()
    }

    /// Delete a unit from the store.
    pub fn remove_unit(&mut self, key: &UnitKey) -> Result<(), CentronicError> {
        let code = self.get(key)?.code;
        self.units.retain(|u| !u.code.eq_ignore_ascii_case(&code));
        self.persist()
    }

    /// Commit a unit's new counter and pairing state.
    ///
    /// The in-memory row is updated first and rolled back if the write to
    /// disk fails, so memory never runs ahead of the file. A dry run applies
    /// and reverts without touching disk.
    pub fn save(&mut self, unit: &Unit, dry_run: bool) -> Result<(), CentronicError> {
        let row = self
            .find_mut(&unit.code)
            .ok_or_else(|| CentronicError::UnknownUnit(unit.code.clone()))?;
        let snapshot = row.clone();

        row.increment = unit.increment;
        row.configured = unit.configured;
        row.last_executed = Utc::now().timestamp();

        if dry_run {
            *self.find_mut(&unit.code).ok_or_else(|| {
                CentronicError::UnknownUnit(unit.code.clone())
            })? = snapshot;
            return Ok(());
        }

        if let Err(e) = self.persist() {
            if let Some(row) = self.find_mut(&unit.code) {
                *row = snapshot;
            }
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), CentronicError> {
        let raw = serde_json::to_string_pretty(&self.units).map_err(io::Error::other)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Render the configured units as a listing for the CLI.
    pub fn format_listing(&self) -> String {
        let configured = self.get_configured();
        if configured.is_empty() {
            return "no configured units".to_string();
        }
        let mut out = String::new();
        for (n, unit) in configured.iter().enumerate() {
            let last = if unit.last_executed == 0 {
                "never".to_string()
            } else {
                match Local.timestamp_opt(unit.last_executed, 0) {
                    chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M").to_string(),
                    _ => "unknown".to_string(),
                }
            };
            out.push_str(&format!(
                "{}) unit {}  counter {:04X}  last used {}\n",
                n + 1,
                unit.code,
                unit.increment,
                last
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> UnitStore {
        UnitStore::open(dir.path().join(STORE_FILE)).unwrap()
    }

    #[test]
    fn test_bootstrap_seeds_default_units() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.all().len(), DEFAULT_UNIT_CODES.len());
        assert!(store.all().iter().all(|u| !u.configured && u.increment == 0));
        assert!(dir.path().join(STORE_FILE).exists());
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = store_in(&dir);
            let mut unit = store.get(&UnitKey::Code("1737c".to_string())).unwrap();
            unit.increment = 77;
            unit.configured = true;
            store.save(&unit, false).unwrap();
        }

        let store = store_in(&dir);
        let unit = store.get(&UnitKey::Code("1737c".to_string())).unwrap();
        assert_eq!(unit.increment, 77);
        assert!(unit.configured);
        assert!(unit.last_executed > 0);
    }

    #[test]
    fn test_index_lookup_is_one_based() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.get(&UnitKey::Index(1)).unwrap().code, "1737b");
        assert_eq!(store.get(&UnitKey::Index(5)).unwrap().code, "1737f");
        assert!(store.get(&UnitKey::Index(0)).is_err());
        assert!(store.get(&UnitKey::Index(6)).is_err());
    }

    #[test]
    fn test_dry_run_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let mut unit = store.get(&UnitKey::Code("1737b".to_string())).unwrap();
        unit.increment = 42;
        unit.configured = true;
        store.save(&unit, true).unwrap();

        let unchanged = store.get(&UnitKey::Code("1737b".to_string())).unwrap();
        assert_eq!(unchanged.increment, 0);
        assert!(!unchanged.configured);

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.get(&UnitKey::Code("1737b".to_string())).unwrap().increment,
            0
        );
    }

    #[test]
    fn test_legacy_counter_migration() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LEGACY_NUMBER_FILE), "1234\n").unwrap();

        let store = store_in(&dir);
        let unit = store.get(&UnitKey::Code("1737b".to_string())).unwrap();
        assert_eq!(unit.increment, 1234);
        assert!(unit.configured);
        assert!(!dir.path().join(LEGACY_NUMBER_FILE).exists());
    }

    #[test]
    fn test_garbled_legacy_counter_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LEGACY_NUMBER_FILE), "not a number").unwrap();

        let store = store_in(&dir);
        let unit = store.get(&UnitKey::Code("1737b".to_string())).unwrap();
        assert_eq!(unit.increment, 0);
        assert!(!unit.configured);
        // The unreadable file stays put for inspection.
        assert!(dir.path().join(LEGACY_NUMBER_FILE).exists());
    }

    #[test]
    fn test_configured_listing_sorted_by_code() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        for code in ["1737e", "1737c"] {
            let mut unit = store.get(&UnitKey::Code(code.to_string())).unwrap();
            unit.configured = true;
            store.save(&unit, false).unwrap();
        }

        let configured = store.get_configured();
        assert_eq!(configured.len(), 2);
        assert_eq!(configured[0].code, "1737c");
        assert_eq!(configured[1].code, "1737e");

        let listing = store.format_listing();
        assert!(listing.contains("unit 1737c"));
        assert!(listing.contains("last used"));
    }

    #[test]
    fn test_add_and_remove_unit() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        store.add_unit("aaaa1").unwrap();
        assert_eq!(store.all().len(), 6);
        assert!(store.add_unit("aaaa1").is_err());
        assert!(store.add_unit("xyz").is_err());

        store
            .remove_unit(&UnitKey::Code("aaaa1".to_string()))
            .unwrap();
        assert_eq!(store.all().len(), 5);
    }

    #[test]
    fn test_counter_wraps_at_sixteen_bits() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let mut unit = store.get(&UnitKey::Code("1737b".to_string())).unwrap();
        unit.increment = u16::MAX;
        store.save(&unit, false).unwrap();

        unit.increment = unit.increment.wrapping_add(1);
        store.save(&unit, false).unwrap();
        assert_eq!(
            store.get(&UnitKey::Code("1737b".to_string())).unwrap().increment,
            0
        );
    }
}
