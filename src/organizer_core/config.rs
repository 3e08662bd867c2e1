//! User preferences persisted as `config.toml`.
//!
//! Sections:
//! - `[api_keys]` - service name to API key
//! - `[geocoding]` - reverse-geocoding provider, endpoint and timeout
//! - `[exiftool]` - external tool program and timeout
//! - `[cache]` - metadata cache location and lifetime
//! - `[organize]` - default date layout, grouping distance, copy or move
//!
//! Values are addressed with dotted keys (`geocoding.enabled`,
//! `api_keys.positionstack`) through [`ConfigStore`].

use crate::organizer_core::error::{OrganizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const APP_DIR: &str = "photo-organizer";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Move => write!(f, "move"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "move" => Ok(TransferMode::Move),
            other => Err(format!("unknown transfer mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeocodingProvider {
    /// OpenStreetMap reverse lookup; no key needed.
    #[default]
    Nominatim,
    /// Requires `api_keys.positionstack`.
    Positionstack,
}

impl GeocodingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodingProvider::Nominatim => "nominatim",
            GeocodingProvider::Positionstack => "positionstack",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            GeocodingProvider::Nominatim => "https://nominatim.openstreetmap.org/reverse",
            GeocodingProvider::Positionstack => "http://api.positionstack.com/v1/reverse",
        }
    }

    pub fn requires_key(&self) -> bool {
        matches!(self, GeocodingProvider::Positionstack)
    }
}

impl FromStr for GeocodingProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominatim" => Ok(GeocodingProvider::Nominatim),
            "positionstack" => Ok(GeocodingProvider::Positionstack),
            other => Err(format!("unknown geocoding provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeocodingSettings {
    pub enabled: bool,
    pub provider: GeocodingProvider,
    /// Overrides the provider's default endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeocodingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: GeocodingProvider::default(),
            endpoint: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExifToolSettings {
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for ExifToolSettings {
    fn default() -> Self {
        Self {
            program: "exiftool".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Database file; defaults to the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 86_400,
            path: None,
        }
    }
}

impl CacheSettings {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(APP_DIR).join("metadata-cache.db")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrganizeSettings {
    pub date_format: String,
    pub max_distance_km: f64,
    pub transfer: TransferMode,
}

impl Default for OrganizeSettings {
    fn default() -> Self {
        Self {
            date_format: "year/month/day".to_string(),
            max_distance_km: 1.0,
            transfer: TransferMode::Copy,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_keys: BTreeMap<String, String>,
    pub geocoding: GeocodingSettings,
    pub exiftool: ExifToolSettings,
    pub cache: CacheSettings,
    pub organize: OrganizeSettings,
}

impl Config {
    /// API key for `service`, if one is set and non-empty.
    pub fn api_key(&self, service: &str) -> Option<&str> {
        self.api_keys
            .get(service)
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
    }
}

/// Key/value access to preferences with dotted keys.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| OrganizerError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl ConfigStore for Config {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(service) = key.strip_prefix("api_keys.") {
            return Ok(self.api_keys.get(service).cloned());
        }
        let value = match key {
            "geocoding.enabled" => Some(self.geocoding.enabled.to_string()),
            "geocoding.provider" => Some(self.geocoding.provider.as_str().to_string()),
            "geocoding.endpoint" => self.geocoding.endpoint.clone(),
            "geocoding.timeout_secs" => Some(self.geocoding.timeout_secs.to_string()),
            "exiftool.program" => Some(self.exiftool.program.clone()),
            "exiftool.timeout_secs" => Some(self.exiftool.timeout_secs.to_string()),
            "cache.enabled" => Some(self.cache.enabled.to_string()),
            "cache.ttl_secs" => Some(self.cache.ttl_secs.to_string()),
            "cache.path" => self.cache.path.as_ref().map(|p| p.display().to_string()),
            "organize.date_format" => Some(self.organize.date_format.clone()),
            "organize.max_distance_km" => Some(self.organize.max_distance_km.to_string()),
            "organize.transfer" => Some(self.organize.transfer.to_string()),
            _ => return Err(OrganizerError::UnknownConfigKey(key.to_string())),
        };
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(service) = key.strip_prefix("api_keys.") {
            if service.is_empty() {
                return Err(OrganizerError::UnknownConfigKey(key.to_string()));
            }
            self.api_keys.insert(service.to_string(), value.trim().to_string());
            return Ok(());
        }
        match key {
            "geocoding.enabled" => self.geocoding.enabled = parse_value(key, value)?,
            "geocoding.provider" => self.geocoding.provider = parse_value(key, value)?,
            "geocoding.endpoint" => self.geocoding.endpoint = optional(value),
            "geocoding.timeout_secs" => self.geocoding.timeout_secs = parse_value(key, value)?,
            "exiftool.program" => self.exiftool.program = value.trim().to_string(),
            "exiftool.timeout_secs" => self.exiftool.timeout_secs = parse_value(key, value)?,
            "cache.enabled" => self.cache.enabled = parse_value(key, value)?,
            "cache.ttl_secs" => self.cache.ttl_secs = parse_value(key, value)?,
            "cache.path" => self.cache.path = optional(value).map(PathBuf::from),
            "organize.date_format" => self.organize.date_format = value.trim().to_string(),
            "organize.max_distance_km" => {
                let distance: f64 = parse_value(key, value)?;
                if !distance.is_finite() || distance < 0.0 {
                    return Err(OrganizerError::InvalidConfigValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.organize.max_distance_km = distance;
            }
            "organize.transfer" => self.organize.transfer = parse_value(key, value)?,
            _ => return Err(OrganizerError::UnknownConfigKey(key.to_string())),
        }
        Ok(())
    }
}

/// Platform config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Loads configuration from a specific path. A missing file yields defaults.
pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Saves configuration to a specific path.
pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// A [`Config`] bound to the file it was loaded from.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
    config: Config,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = load_from_path(&path)?;
        Ok(Self { path, config })
    }

    /// Open the file given on the command line, or the platform default.
    pub fn open_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => Self::open(path),
            None => Err(OrganizerError::Other(
                "no configuration directory on this platform".to_string(),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn save(&self) -> Result<()> {
        save_to_path(&self.config, &self.path)
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.config.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.config.set(key, value)
    }
}
