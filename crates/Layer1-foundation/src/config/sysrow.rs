//! SysRow Config
//!
//! Loaded from `<data dir>/config.json`. Every field is optional in the file.

use crate::storage::{DataLayout, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside the data directory
pub const SYSROW_CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the default data directory
pub const SYSROW_HOME_ENV: &str = "SYSROW_HOME";

const DEFAULT_DATA_DIR_NAME: &str = ".sysrow";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SysrowConfig {
    /// Version (for migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Data root; `None` resolves to `$SYSROW_HOME` or `~/.sysrow`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Age after which finished tasks are swept by `cleanup`
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Restore the persisted priority when loading a task.
    /// Off by default: loaded tasks come back at Normal priority.
    #[serde(default)]
    pub restore_priority: bool,

    /// Grace period between SIGTERM and SIGKILL when cancelling a running task
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

/// Settings found in a config file. A key that is absent leaves the base
/// value untouched; a key that is present always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_priority: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_grace_secs: Option<u64>,
}

impl Default for SysrowConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: None,
            retention_secs: default_retention_secs(),
            restore_priority: false,
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

impl SysrowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Resolve the data directory and load its config file.
    ///
    /// `data_dir` (e.g. from a CLI flag) wins over the environment and the
    /// home-directory default. A missing config file yields defaults.
    pub fn load(data_dir: Option<&Path>) -> Result<Self> {
        let root = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_data_dir()?,
        };
        let mut config = Self::load_from(&root)?;
        config.data_dir = Some(root);
        Ok(config)
    }

    /// Load `config.json` from a data directory
    pub fn load_from(root: &Path) -> Result<Self> {
        let store = JsonStore::new(root);
        let mut config = Self::new();
        if let Some(file_config) = store.load_optional::<ConfigOverlay>(SYSROW_CONFIG_FILE)? {
            config.merge(file_config);
        }
        Ok(config)
    }

    /// Write `config.json` into the resolved data directory
    pub fn save(&self) -> Result<()> {
        let store = JsonStore::new(self.resolved_data_dir()?);
        store.save(SYSROW_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Apply every key the overlay sets
    pub fn merge(&mut self, overlay: ConfigOverlay) {
        if let Some(version) = overlay.version {
            self.version = version;
        }
        if let Some(dir) = overlay.data_dir {
            self.data_dir = Some(dir);
        }
        if let Some(secs) = overlay.retention_secs {
            self.retention_secs = secs;
        }
        if let Some(restore) = overlay.restore_priority {
            self.restore_priority = restore;
        }
        if let Some(secs) = overlay.kill_grace_secs {
            self.kill_grace_secs = secs;
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn restore_priority(mut self, restore: bool) -> Self {
        self.restore_priority = restore;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace_secs = grace.as_secs();
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn layout(&self) -> Result<DataLayout> {
        Ok(DataLayout::new(self.resolved_data_dir()?))
    }

    pub fn retention_duration(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn kill_grace_duration(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// `$SYSROW_HOME`, else `~/.sysrow`
pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(SYSROW_HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DATA_DIR_NAME))
        .ok_or_else(|| Error::Config("Cannot find home directory".to_string()))
}

// ============================================================================
// Helpers
// ============================================================================

fn default_version() -> u32 {
    1
}

fn default_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_kill_grace_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = SysrowConfig::new();
        assert_eq!(config.version, 1);
        assert!(config.data_dir.is_none());
        assert!(!config.restore_priority);
        assert_eq!(config.retention_duration(), Duration::from_secs(604_800));
        assert_eq!(config.kill_grace_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = SysrowConfig::new()
            .data_dir("/tmp/sysrow")
            .restore_priority(true)
            .retention(Duration::from_secs(3600));

        assert_eq!(config.resolved_data_dir().unwrap(), PathBuf::from("/tmp/sysrow"));
        assert!(config.restore_priority);
        assert_eq!(config.retention_secs, 3600);
    }

    #[test]
    fn test_config_merge() {
        let mut base = SysrowConfig::new().data_dir("/a");
        let overlay = ConfigOverlay {
            retention_secs: Some(60),
            restore_priority: Some(true),
            ..Default::default()
        };

        base.merge(overlay);

        assert_eq!(base.data_dir, Some(PathBuf::from("/a")));
        assert_eq!(base.retention_secs, 60);
        assert_eq!(base.kill_grace_secs, 5);
        assert!(base.restore_priority);
    }

    #[test]
    fn test_merge_applies_explicit_defaults_and_keeps_absent_keys() {
        let mut base = SysrowConfig::new()
            .restore_priority(true)
            .retention(Duration::from_secs(60))
            .kill_grace(Duration::from_secs(30));

        base.merge(ConfigOverlay {
            retention_secs: Some(default_retention_secs()),
            kill_grace_secs: Some(default_kill_grace_secs()),
            ..Default::default()
        });
        assert_eq!(base.retention_secs, default_retention_secs());
        assert_eq!(base.kill_grace_secs, default_kill_grace_secs());
        assert!(base.restore_priority);

        base.merge(ConfigOverlay::default());
        assert!(base.restore_priority);

        base.merge(ConfigOverlay {
            restore_priority: Some(false),
            ..Default::default()
        });
        assert!(!base.restore_priority);
    }

    #[test]
    fn test_overlay_from_json_only_sets_present_keys() {
        let overlay: ConfigOverlay = serde_json::from_str(r#"{ "killGraceSecs": 5 }"#).unwrap();
        assert_eq!(
            overlay,
            ConfigOverlay {
                kill_grace_secs: Some(5),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = SysrowConfig::load(Some(dir.path())).unwrap();

        assert_eq!(config.data_dir, Some(dir.path().to_path_buf()));
        assert_eq!(config.retention_secs, default_retention_secs());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SYSROW_CONFIG_FILE),
            r#"{ "retentionSecs": 120, "restorePriority": true }"#,
        )
        .unwrap();

        let config = SysrowConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.retention_secs, 120);
        assert!(config.restore_priority);
        assert_eq!(config.kill_grace_secs, 5);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let config = SysrowConfig::new()
            .data_dir(dir.path())
            .kill_grace(Duration::from_secs(2));
        config.save().unwrap();

        let loaded = SysrowConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.kill_grace_secs, 2);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SYSROW_CONFIG_FILE), "{ nope").unwrap();

        let err = SysrowConfig::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }
}
