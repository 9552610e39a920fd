//! User settings and their persistence.
//!
//! Settings live under the `settings` key of a small key/value store. The
//! service installs defaults on first run and broadcasts every accepted
//! update through a watch channel so the scheduler can pick it up.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use dipscan_common::error::ResultExt;
use dipscan_common::{Error, Result};

/// Store key holding the [`Settings`] object.
pub const SETTINGS_KEY: &str = "settings";

// ============================================================================
// Settings
// ============================================================================

/// User-tunable behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Minutes between scheduled prompts.
    pub refresh_interval_minutes: u64,
    /// Maximum number of records shown per prompt.
    pub max_instruments: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 5,
            max_instruments: 10,
        }
    }
}

impl Settings {
    /// Both values must be at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_minutes == 0 {
            return Err(Error::InvalidInput(
                "refreshIntervalMinutes must be at least 1".into(),
            ));
        }
        if self.max_instruments == 0 {
            return Err(Error::InvalidInput("maxInstruments must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply a partial update.
    pub fn merged(self, update: SettingsUpdate) -> Self {
        Self {
            refresh_interval_minutes: update
                .refresh_interval_minutes
                .unwrap_or(self.refresh_interval_minutes),
            max_instruments: update.max_instruments.unwrap_or(self.max_instruments),
        }
    }
}

/// Partial settings as accepted from callers. Missing fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsUpdate {
    pub refresh_interval_minutes: Option<u64>,
    pub max_instruments: Option<usize>,
}

// ============================================================================
// Stores
// ============================================================================

/// Key/value persistence over JSON values.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// JSON object file. Writes go to a sibling temp file which is then renamed
/// over the original.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = fs::read_to_string(&self.path)
            .context(format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content)
            .context(format!("Failed to parse {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            _ => Err(Error::Store(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .context(format!("Failed to create directory {}", dir.display()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&tmp, content).context(format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .context(format!("Failed to replace {}", self.path.display()))
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(&map)?;
        debug!(path = %self.path.display(), key, "Settings store updated");
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// Service
// ============================================================================

/// Owns the current settings and broadcasts changes.
#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    tx: Arc<watch::Sender<Settings>>,
    update_lock: Arc<Mutex<()>>,
}

impl SettingsService {
    /// Load persisted settings, installing defaults when none exist.
    ///
    /// A stored value that does not decode or validate is replaced by the
    /// defaults.
    pub fn install(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let settings = match store.get(SETTINGS_KEY)? {
            None => {
                let defaults = Settings::default();
                store.set(SETTINGS_KEY, serde_json::to_value(defaults)?)?;
                info!(
                    refresh_interval_minutes = defaults.refresh_interval_minutes,
                    max_instruments = defaults.max_instruments,
                    "Installed default settings"
                );
                defaults
            }
            Some(value) => match decode(value) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(error = %e, "Stored settings are invalid, restoring defaults");
                    let defaults = Settings::default();
                    store.set(SETTINGS_KEY, serde_json::to_value(defaults)?)?;
                    defaults
                }
            },
        };

        let (tx, _rx) = watch::channel(settings);
        Ok(Self {
            store,
            tx: Arc::new(tx),
            update_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn current(&self) -> Settings {
        *self.tx.borrow()
    }

    /// Receiver that observes every accepted update.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Validate, persist and broadcast. Nothing changes on error.
    pub fn update(&self, update: SettingsUpdate) -> Result<Settings> {
        let _guard = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());

        let next = self.current().merged(update);
        next.validate()?;
        self.store
            .set(SETTINGS_KEY, serde_json::to_value(next)?)
            .context("Failed to persist settings")?;
        self.tx.send_replace(next);

        info!(
            refresh_interval_minutes = next.refresh_interval_minutes,
            max_instruments = next.max_instruments,
            "Settings updated"
        );
        Ok(next)
    }
}

fn decode(value: Value) -> Result<Settings> {
    let settings: Settings = serde_json::from_value(value)?;
    settings.validate()?;
    Ok(settings)
}
