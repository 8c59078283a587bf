//! Per-device monitoring policy
//!
//! [`DeviceFilter`] owns the process-wide [`DeviceFilterConfig`] behind a
//! mutex. Every mutation goes through the filter and is written back
//! through a [`FilterConfigStore`] before it becomes visible.

use lanwatch_core::{Error, MacAddr, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_DESCRIPTION: &str =
    "Set monitor_all_devices to false to record only the interested devices";

/// Filter configuration as stored on disk.
///
/// `interested` holds parsed [`MacAddr`] values, so entries are
/// canonical and duplicate spellings collapse on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilterConfig {
    #[serde(rename = "monitor_all_devices")]
    pub monitor_all: bool,
    #[serde(rename = "interested_devices", default)]
    pub interested: BTreeSet<MacAddr>,
    #[serde(default)]
    pub description: String,
}

impl Default for DeviceFilterConfig {
    fn default() -> Self {
        Self {
            monitor_all: true,
            interested: BTreeSet::new(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

impl DeviceFilterConfig {
    /// Filtering is on (`monitor_all` off)
    pub fn filtering_enabled(&self) -> bool {
        !self.monitor_all
    }
}

/// Observable summary of the filter's effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Every device is recorded
    MonitorAll,
    /// Only the listed devices are recorded
    Filtering { interested: usize },
    /// Filtering is on with an empty list: nothing is recorded
    AdmitsNothing,
}

/// Durable home of the filter configuration
pub trait FilterConfigStore: Send + Sync {
    fn load(&self) -> Result<DeviceFilterConfig>;
    fn save(&self, config: &DeviceFilterConfig) -> Result<()>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonFilterStore {
    path: PathBuf,
}

impl JsonFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FilterConfigStore for JsonFilterStore {
    /// A missing file is the default configuration
    fn load(&self) -> Result<DeviceFilterConfig> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No filter file, using defaults");
                return Ok(DeviceFilterConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("{}: {}", self.path.display(), e)))
    }

    /// Write to a sibling temp file and rename over the original
    fn save(&self, config: &DeviceFilterConfig) -> Result<()> {
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| Error::config(format!("serialize filter: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text + "\n")?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Saved filter configuration");
        Ok(())
    }
}

/// Store that keeps the configuration in memory
#[derive(Debug, Default)]
pub struct MemoryFilterStore {
    config: Mutex<Option<DeviceFilterConfig>>,
    saves: Mutex<usize>,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DeviceFilterConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful saves
    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }
}

impl FilterConfigStore for MemoryFilterStore {
    fn load(&self) -> Result<DeviceFilterConfig> {
        Ok(self.config.lock().clone().unwrap_or_default())
    }

    fn save(&self, config: &DeviceFilterConfig) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Admission policy deciding whose activity is persisted
pub struct DeviceFilter {
    config: Mutex<DeviceFilterConfig>,
    store: Arc<dyn FilterConfigStore>,
}

impl DeviceFilter {
    /// Load the configuration from `store`
    pub fn load(store: Arc<dyn FilterConfigStore>) -> Result<Self> {
        let config = store.load()?;
        let filter = Self {
            config: Mutex::new(config),
            store,
        };
        filter.warn_if_admits_nothing();
        Ok(filter)
    }

    /// Filter over a fixed configuration, saved only in memory
    pub fn in_memory(config: DeviceFilterConfig) -> Self {
        Self {
            store: Arc::new(MemoryFilterStore::with_config(config.clone())),
            config: Mutex::new(config),
        }
    }

    /// Whether activity from `hardware_address` should be recorded.
    ///
    /// With `monitor_all` set every input is admitted, malformed ones
    /// included. Otherwise a malformed address is never admitted.
    pub fn is_admitted(&self, hardware_address: &str) -> bool {
        let config = self.config.lock();
        if config.monitor_all {
            return true;
        }
        hardware_address
            .parse::<MacAddr>()
            .map(|mac| config.interested.contains(&mac))
            .unwrap_or(false)
    }

    pub fn is_admitted_mac(&self, mac: &MacAddr) -> bool {
        let config = self.config.lock();
        config.monitor_all || config.interested.contains(mac)
    }

    /// Add a device; returns false if it was already present
    pub fn add(&self, hardware_address: &str) -> Result<bool> {
        let mac: MacAddr = hardware_address.parse()?;
        let added = self.mutate(|config| config.interested.insert(mac))?;
        if added {
            info!(mac = %mac, "Added device to filter");
        }
        Ok(added)
    }

    /// Remove a device; returns false if it was not present
    pub fn remove(&self, hardware_address: &str) -> Result<bool> {
        let mac: MacAddr = hardware_address.parse()?;
        let removed = self.mutate(|config| config.interested.remove(&mac))?;
        if removed {
            info!(mac = %mac, "Removed device from filter");
        }
        Ok(removed)
    }

    /// Turn filtering on (record only interested devices)
    pub fn enable(&self) -> Result<()> {
        self.mutate(|config| config.monitor_all = false)?;
        info!("Device filtering enabled");
        self.warn_if_admits_nothing();
        Ok(())
    }

    /// Turn filtering off (record every device)
    pub fn disable(&self) -> Result<()> {
        self.mutate(|config| config.monitor_all = true)?;
        info!("Device filtering disabled, monitoring all devices");
        Ok(())
    }

    /// Empty the interested list
    pub fn clear(&self) -> Result<usize> {
        let cleared = self.mutate(|config| {
            let n = config.interested.len();
            config.interested.clear();
            n
        })?;
        info!(cleared, "Cleared filter list");
        self.warn_if_admits_nothing();
        Ok(cleared)
    }

    pub fn status(&self) -> FilterStatus {
        let config = self.config.lock();
        if config.monitor_all {
            FilterStatus::MonitorAll
        } else if config.interested.is_empty() {
            FilterStatus::AdmitsNothing
        } else {
            FilterStatus::Filtering {
                interested: config.interested.len(),
            }
        }
    }

    pub fn snapshot(&self) -> DeviceFilterConfig {
        self.config.lock().clone()
    }

    /// Apply `f` to a copy, persist it, then publish it.
    ///
    /// A failed save leaves the live configuration untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut DeviceFilterConfig) -> T) -> Result<T> {
        let mut config = self.config.lock();
        let mut next = config.clone();
        let out = f(&mut next);
        if next != *config {
            self.store.save(&next)?;
            *config = next;
        }
        Ok(out)
    }

    fn warn_if_admits_nothing(&self) {
        if self.status() == FilterStatus::AdmitsNothing {
            warn!(
                "Device filtering is enabled but no devices are listed; nothing will be recorded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const X: &str = "AA:BB:CC:DD:EE:FF";
    const Y: &str = "11:22:33:44:55:66";

    fn filter() -> (DeviceFilter, Arc<MemoryFilterStore>) {
        let store = Arc::new(MemoryFilterStore::new());
        let filter = DeviceFilter::load(store.clone()).unwrap();
        (filter, store)
    }

    #[test]
    fn test_monitor_all_admits_everything() {
        let (filter, _) = filter();
        assert_eq!(filter.status(), FilterStatus::MonitorAll);
        assert!(filter.is_admitted(X));
        assert!(filter.is_admitted(Y));
        assert!(filter.is_admitted("garbage"));
    }

    #[test]
    fn test_add_then_enable() {
        let (filter, _) = filter();
        filter.add(X).unwrap();
        filter.enable().unwrap();

        assert!(filter.is_admitted(X));
        assert!(filter.is_admitted("aabbccddeeff"));
        assert!(!filter.is_admitted(Y));
        assert!(!filter.is_admitted("garbage"));
        assert_eq!(filter.status(), FilterStatus::Filtering { interested: 1 });
    }

    #[test]
    fn test_enable_with_empty_list_admits_nothing() {
        let (filter, _) = filter();
        filter.enable().unwrap();

        assert_eq!(filter.status(), FilterStatus::AdmitsNothing);
        assert!(!filter.is_admitted(X));
        assert!(!filter.is_admitted(Y));
    }

    #[test]
    fn test_add_remove_idempotent_and_persisted() {
        let (filter, store) = filter();
        assert!(filter.add("aa-bb-cc-dd-ee-ff").unwrap());
        assert!(!filter.add(X).unwrap());
        assert_eq!(store.saves(), 1);

        assert!(filter.remove("AABBCCDDEEFF").unwrap());
        assert!(!filter.remove(X).unwrap());
        assert_eq!(store.saves(), 2);

        assert!(filter.add("nope").is_err());
        assert_eq!(store.saves(), 2);
    }

    #[test]
    fn test_clear() {
        let (filter, store) = filter();
        filter.add(X).unwrap();
        filter.add(Y).unwrap();
        assert_eq!(filter.clear().unwrap(), 2);
        assert!(store.load().unwrap().interested.is_empty());
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device_filter.json");
        let store = Arc::new(JsonFilterStore::new(&path));

        let filter = DeviceFilter::load(store.clone()).unwrap();
        assert!(filter.snapshot().monitor_all);
        assert!(!path.exists());

        filter.add("aa:bb:cc:dd:ee:ff").unwrap();
        filter.enable().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["monitor_all_devices"], false);
        assert_eq!(json["interested_devices"][0], X);

        let reloaded = DeviceFilter::load(store).unwrap();
        assert!(reloaded.is_admitted(X));
        assert!(!reloaded.is_admitted(Y));
    }

    #[test]
    fn test_json_store_canonicalizes_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.json");
        fs::write(
            &path,
            r#"{"monitor_all_devices": false,
                "interested_devices": ["aa:bb:cc:dd:ee:ff", "AABBCCDDEEFF"]}"#,
        )
        .unwrap();

        let config = JsonFilterStore::new(&path).load().unwrap();
        assert_eq!(config.interested.len(), 1);
        assert!(config.description.is_empty());
    }

    #[test]
    fn test_json_store_rejects_bad_address() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.json");
        fs::write(
            &path,
            r#"{"monitor_all_devices": true, "interested_devices": ["zz"]}"#,
        )
        .unwrap();

        assert!(matches!(
            JsonFilterStore::new(&path).load(),
            Err(Error::Config(_))
        ));
    }
}
