use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MidfileError;

pub const CONFIG_ENV: &str = "MIDFILE_CONFIG";
pub const CONFIG_FILE_NAME: &str = "midfile.yml";
pub const DEFAULT_DBPATH: &str = "/data/midfile.db";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbpath: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_path_style: bool,
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self, MidfileError> {
        // An empty document is a valid, empty config.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|err| MidfileError::ConfigParse(err.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, MidfileError> {
        serde_yaml::to_string(self).map_err(|err| MidfileError::ConfigParse(err.to_string()))
    }

    pub fn dbpath(&self) -> Utf8PathBuf {
        self.dbpath
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DBPATH))
    }

    pub fn cloud(&self) -> Result<&CloudConfig, MidfileError> {
        self.cloud
            .as_ref()
            .ok_or_else(|| MidfileError::CloudConfig("config has no `cloud` section".to_string()))
    }

    pub fn default_bucket(&self) -> Option<&str> {
        self.cloud
            .as_ref()
            .and_then(|cloud| cloud.bucket.as_deref())
            .filter(|bucket| !bucket.trim().is_empty())
    }

    /// Picks the explicit bucket, falling back to `cloud.bucket`.
    pub fn resolve_bucket(&self, explicit: Option<&str>) -> Result<String, MidfileError> {
        if let Some(bucket) = explicit {
            return Ok(bucket.to_string());
        }
        let bucket = self.default_bucket().ok_or(MidfileError::MissingBucket)?;
        info!(bucket, "using default bucket from config");
        Ok(bucket.to_string())
    }
}

/// Outcome of writing a new `dbpath` into the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWrite {
    Persisted,
    ReadOnly,
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Utf8PathBuf,
}

impl ConfigLoader {
    /// Resolves the config location: explicit path, then `MIDFILE_CONFIG`,
    /// then the platform config directory.
    pub fn locate(explicit: Option<&str>) -> Result<Self, MidfileError> {
        if let Some(path) = explicit {
            return Ok(Self::at(path));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Ok(Self::at(path.trim()));
            }
        }
        let dirs = ProjectDirs::from("", "", "midfile").ok_or_else(|| {
            MidfileError::Filesystem("unable to resolve config directory".to_string())
        })?;
        let path = Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_FILE_NAME))
            .map_err(|_| MidfileError::Filesystem("invalid config path".to_string()))?;
        Ok(Self { path })
    }

    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().is_file()
    }

    pub fn load(&self) -> Result<Config, MidfileError> {
        if !self.exists() {
            return Err(MidfileError::MissingConfig(self.path.clone()));
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| MidfileError::ConfigRead(self.path.clone()))?;
        Config::from_yaml(&content)
    }

    /// Like [`load`](Self::load) but a missing file yields an empty config.
    pub fn load_or_default(&self) -> Result<Config, MidfileError> {
        if self.exists() {
            self.load()
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, config: &Config) -> Result<(), MidfileError> {
        let content = config.to_yaml()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
        }
        crate::fs_util::write_atomic(&self.path, content.as_bytes())
    }

    /// Stores `dbpath` in the config, bootstrapping the file when absent.
    /// A config that cannot be written is reported, not treated as fatal.
    pub fn update_dbpath(&self, dbpath: &Utf8Path) -> Result<(Config, ConfigWrite), MidfileError> {
        let mut config = self.load_or_default()?;
        config.dbpath = Some(dbpath.to_path_buf());
        match self.save(&config) {
            Ok(()) => {
                info!(config = %self.path, dbpath = %dbpath, "updated dbpath in config");
                Ok((config, ConfigWrite::Persisted))
            }
            Err(err) => {
                warn!(config = %self.path, error = %err, "config file is not writable");
                warn!("edit the config manually and set dbpath: {dbpath}");
                Ok((config, ConfigWrite::ReadOnly))
            }
        }
    }
}
