use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub maintenance: MaintenanceConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,

    #[serde(skip)]
    config_file_path: PathBuf,
    #[serde(skip)]
    pub data_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Folder (under the data directory) holding content
    pub storage: String,
    /// Folder (under the data directory) holding the metadata store
    pub base: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage: "storage".to_string(),
            base: "base".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Pause between two republished records
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,
}

fn default_item_delay() -> u64 {
    3000
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            item_delay_ms: default_item_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline applied to operations that do not pass their own
    #[serde(default)]
    pub operation_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn operation(&self) -> Option<Duration> {
        self.operation_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nRun with --init to create a new configuration",
                config_path.display()
            );
        }

        let contents =
            fs::read_to_string(&config_path).context("Failed to read configuration file")?;

        let mut config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse configuration file")?;

        config.config_file_path = config_path;
        config.data_directory = data_dir;

        Ok(config)
    }

    /// Create and save a new default configuration
    pub fn create_default(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        // Create directories
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&data_dir)?;

        let mut config = Self::for_data_dir(&data_dir);
        config.config_file_path = config_path.clone();

        // Save configuration
        let yaml = serde_yaml::to_string(&config)?;
        fs::write(&config_path, yaml)?;

        Ok(config)
    }

    /// Default configuration rooted at `data_dir`, not backed by a file
    pub fn for_data_dir(data_dir: &Path) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        Config {
            node: NodeConfig {
                name: format!("swarmlink-{}", &suffix[..8]),
            },
            storage: StorageConfig::default(),
            maintenance: MaintenanceConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
            config_file_path: PathBuf::new(),
            data_directory: data_dir.to_path_buf(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_directory.join(&self.storage.storage)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.data_directory.join(&self.storage.base)
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("swarmlink")
            .join("config.yaml")
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("swarmlink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_load() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("conf").join("config.yaml");
        let data_dir = temp.path().join("data");

        let created =
            Config::create_default(Some(config_path.clone()), Some(data_dir.clone())).unwrap();
        assert!(config_path.exists());
        assert!(data_dir.exists());

        let loaded = Config::load(Some(config_path.clone()), Some(data_dir.clone())).unwrap();
        assert_eq!(loaded.node.name, created.node.name);
        assert_eq!(loaded.maintenance.interval_secs, 3600);
        assert_eq!(loaded.maintenance.item_delay(), Duration::from_secs(3));
        assert_eq!(loaded.timeouts.operation(), None);
        assert_eq!(loaded.config_path(), config_path.as_path());
        assert_eq!(loaded.storage_dir(), data_dir.join("storage"));
        assert_eq!(loaded.base_dir(), data_dir.join("base"));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(Some(temp.path().join("nope.yaml")), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_optional_fields_default() {
        let yaml = r#"
node:
  name: test
storage:
  storage: content
  base: meta
maintenance:
  enabled: false
  interval_secs: 60
timeouts: {}
logging:
  level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.maintenance.item_delay_ms, 3000);
        assert!(!config.logging.json);
        assert_eq!(config.storage.storage, "content");
    }
}
