use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;

/// Name of the per-user state directory under the home directory.
pub const APP_DIR_NAME: &str = ".vdj_manager";

/// Per-user state directory (`~/.vdj_manager`).
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Where VirtualDJ keeps its database on this platform.
pub fn default_database_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(target_os = "macos") {
        home.join("Library")
            .join("Application Support")
            .join("VirtualDJ")
            .join("database.xml")
    } else {
        dirs::document_dir()
            .unwrap_or(home)
            .join("VirtualDJ")
            .join("database.xml")
    }
}

/// Application settings persisted in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Locations
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub cache_path: PathBuf,
    pub analysis_cache_path: PathBuf,

    // Normalization
    pub target_lufs: f64,

    // Batch tasks
    pub checkpoint_every: usize,
    pub checkpoint_max_age_days: u32,

    // Backups
    pub backup_keep: usize,

    /// Path prefix rewrites (`"D:/Music/" -> "/Volumes/Music/"`).
    pub path_mappings: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let app_dir = app_dir();
        Self {
            database_path: default_database_path(),
            backup_dir: app_dir.join("backups"),
            checkpoint_dir: app_dir.join("checkpoints"),
            cache_path: app_dir.join("measurements.sqlite3"),
            analysis_cache_path: app_dir.join("analysis.sqlite3"),
            target_lufs: -14.0,
            checkpoint_every: 50,
            checkpoint_max_age_days: 7,
            backup_keep: 10,
            path_mappings: BTreeMap::new(),
        }
    }
}

/// Configuration manager for VDJ Manager settings.
/// Settings are stored as pretty JSON, by default in `~/.vdj_manager/config.json`.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub target_lufs: ConfigOption<f64>,
    pub checkpoint_every: ConfigOption<usize>,
    pub checkpoint_max_age_days: ConfigOption<u32>,
    pub backup_keep: ConfigOption<usize>,
}

/// Configuration option with a default and an allowed range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub description: String,
}

impl<T: PartialOrd + Copy + std::fmt::Display> ConfigOption<T> {
    fn check(&self, name: &str, value: T, errors: &mut Vec<String>) {
        if let Some((min, max)) = self.valid_range {
            if value < min || value > max {
                errors.push(format!("{} must be between {} and {}", name, min, max));
            }
        }
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager.
    /// If no path is provided, defaults to `config.json` in the app directory.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| app_dir().join("config.json"));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from the configuration file.
    /// Writes a default file when none exists yet.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to the configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: now.clone(),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        write_atomic(&self.config_path, content.as_bytes())
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Validate, update and save settings
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            target_lufs: ConfigOption {
                default: -14.0,
                valid_range: Some((-30.0, -5.0)),
                description: "Integrated loudness target for normalization (LUFS)".to_string(),
            },
            checkpoint_every: ConfigOption {
                default: 50,
                valid_range: Some((1, 10_000)),
                description: "Items processed between checkpoint writes".to_string(),
            },
            checkpoint_max_age_days: ConfigOption {
                default: 7,
                valid_range: Some((1, 365)),
                description: "Age after which finished checkpoints are removed".to_string(),
            },
            backup_keep: ConfigOption {
                default: 10,
                valid_range: Some((1, 1000)),
                description: "Number of database backups to keep".to_string(),
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        schema
            .target_lufs
            .check("target_lufs", settings.target_lufs, &mut errors);
        schema
            .checkpoint_every
            .check("checkpoint_every", settings.checkpoint_every, &mut errors);
        schema.checkpoint_max_age_days.check(
            "checkpoint_max_age_days",
            settings.checkpoint_max_age_days,
            &mut errors,
        );
        schema
            .backup_keep
            .check("backup_keep", settings.backup_keep, &mut errors);

        for (from, to) in &settings.path_mappings {
            if from.trim().is_empty() {
                errors.push(format!("path mapping to {:?} has an empty prefix", to));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Config validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}
