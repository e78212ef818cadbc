//! Per-job control state: tunable parameters plus the error-count ledger.
//!
//! [`ControlStore`] owns the two files the engine manages inside a job's
//! working directory: `control.json` (the job's named parameters, consumed by
//! the external solver) and `error_counts.json` (how many corrections each
//! handler has already applied). The ledger must survive process restarts —
//! it is the only record of correction history, so every mutation is
//! persisted with a write-then-rename before the monitor loop takes its next
//! decision.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Filename of the parameter mapping inside a job's working directory.
pub const CONTROL_FILE: &str = "control.json";

/// Filename of the per-handler correction-count ledger.
pub const LEDGER_FILE: &str = "error_counts.json";

/// Key/value accessor over one job's on-disk configuration and error ledger.
///
/// Owned exclusively by the monitor loop of the job bound to `dir`; never
/// shared across jobs.
#[derive(Debug)]
pub struct ControlStore {
    dir: PathBuf,
    params: Map<String, Value>,
    error_counts: BTreeMap<String, u32>,
}

impl ControlStore {
    /// Loads the store from a working directory, initializing empty state for
    /// any backing file that does not exist yet.
    pub fn load(dir: &Path) -> Result<Self> {
        let params = match Self::read_file(&dir.join(CONTROL_FILE)) {
            Ok(map) => map,
            Err(_) if !dir.join(CONTROL_FILE).exists() => Map::new(),
            Err(e) => return Err(e),
        };

        let ledger_path = dir.join(LEDGER_FILE);
        let error_counts = if ledger_path.exists() {
            let contents = fs::read_to_string(&ledger_path)
                .with_context(|| format!("failed to read {}", ledger_path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("malformed ledger {}", ledger_path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            params,
            error_counts,
        })
    }

    /// The working directory this store is bound to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw parameter lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// String parameter, or `default` when absent or not a string.
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// Boolean parameter, or `default` when absent or not a boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Integer parameter, or `default` when absent or not an integer.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    /// Sets a parameter. Not durable until [`ControlStore::persist`].
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.params.insert(key.to_string(), value.into());
    }

    /// Removes a parameter, returning its previous value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.params.remove(key)
    }

    /// Correction attempts already recorded for a handler; 0 if absent.
    pub fn error_count(&self, handler: &str) -> u32 {
        self.error_counts.get(handler).copied().unwrap_or(0)
    }

    /// Records one more correction attempt for a handler.
    pub fn increment_error_count(&mut self, handler: &str) {
        *self.error_counts.entry(handler.to_string()).or_insert(0) += 1;
    }

    /// Writes both backing files atomically (write to a temp file, then
    /// rename over the target).
    pub fn persist(&self) -> Result<()> {
        Self::write_file(&self.dir.join(CONTROL_FILE), &self.params)?;

        let ledger_path = self.dir.join(LEDGER_FILE);
        let contents = serde_json::to_string_pretty(&self.error_counts)?;
        write_atomic(&ledger_path, &contents)
    }

    /// Reads a control file as a flat key/value mapping.
    ///
    /// The engine never interprets specific keys here; handlers request the
    /// keys they care about by name.
    pub fn read_file(path: &Path) -> Result<Map<String, Value>> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let map: Map<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("malformed control file {}", path.display()))?;
        Ok(map)
    }

    /// Atomically writes a flat key/value mapping to a control file.
    pub fn write_file(path: &Path, map: &Map<String, Value>) -> Result<()> {
        let contents = serde_json::to_string_pretty(map)?;
        write_atomic(path, &contents)
    }
}

// Write-then-rename so a killed process never leaves a half-written file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_initializes_empty_on_fresh_directory() {
        let tmp = TempDir::new().unwrap();
        let store = ControlStore::load(tmp.path()).unwrap();
        assert!(store.get("anything").is_none());
        assert_eq!(store.error_count("mixing"), 0);
    }

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let mut store = ControlStore::load(tmp.path()).unwrap();
        store.set("mode", "warm");
        store.set("steps", 200);
        store.set("symmetry", true);

        assert_eq!(store.get_str("mode", "cold"), "warm");
        assert_eq!(store.get_str("missing", "cold"), "cold");
        assert_eq!(store.get_i64("steps", 0), 200);
        assert_eq!(store.get_i64("missing", 7), 7);
        assert!(store.get_bool("symmetry", false));
        // Wrong type falls back too.
        assert_eq!(store.get_i64("mode", 3), 3);
    }

    #[test]
    fn persisted_params_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let mut store = ControlStore::load(tmp.path()).unwrap();
        store.set("mixing_scheme", "kerker");
        store.persist().unwrap();

        let reloaded = ControlStore::load(tmp.path()).unwrap();
        assert_eq!(reloaded.get_str("mixing_scheme", ""), "kerker");
    }

    #[test]
    fn error_ledger_counts_are_durable() {
        let tmp = TempDir::new().unwrap();

        let mut store = ControlStore::load(tmp.path()).unwrap();
        for _ in 0..3 {
            store.increment_error_count("mixing");
            store.persist().unwrap();
        }
        assert_eq!(store.error_count("mixing"), 3);

        // A freshly constructed store pointed at the same directory observes
        // the same history.
        let fresh = ControlStore::load(tmp.path()).unwrap();
        assert_eq!(fresh.error_count("mixing"), 3);
        assert_eq!(fresh.error_count("symmetry"), 0);
    }

    #[test]
    fn remove_deletes_the_key() {
        let tmp = TempDir::new().unwrap();
        let mut store = ControlStore::load(tmp.path()).unwrap();
        store.set("damping", 0.4);
        assert!(store.remove("damping").is_some());
        assert!(store.get("damping").is_none());
        assert!(store.remove("damping").is_none());
    }

    #[test]
    fn write_file_then_read_file_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("aux.json");

        let mut map = Map::new();
        map.insert("grid".into(), Value::from(64));
        ControlStore::write_file(&path, &map).unwrap();

        let read = ControlStore::read_file(&path).unwrap();
        assert_eq!(read.get("grid").and_then(Value::as_i64), Some(64));
        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }
}
