//! Configuration file (`config.toml`).
//!
//! ```toml
//! [auth]
//! app_key = "..."
//! app_secret = "..."
//! refresh_token = "..."
//!
//! [paths]
//! postprocess_soundcloud = "/automation/postprocessed"
//! postprocess_archive = "/automation/archive"
//! preprocess_live = "/automation/preprocessed/live"
//! preprocess_prerecord = "/automation/preprocessed/prerecord"
//!
//! [pipe]
//! response_timeout_secs = 600
//!
//! [upload]
//! chunk_size = 4194304
//! chunk_timeout_secs = 120
//! ```
//!
//! Only `[auth]` and `paths.postprocess_soundcloud` are needed for uploads.
//! Fetching pending recordings also needs at least one `preprocess_*` folder.
//! Everything else has defaults.

use crate::error::{Error, Result};
use crate::pipe::recipe::Profile;
use crate::upload::session::{CHUNK_SIZE, MAX_OBJECT_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

/// Config to use when none is given on the command line: `./config.toml` if
/// present, else `<user config dir>/rbv/config.toml` if present, else
/// `./config.toml` so the error names the usual place.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_PATH);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("rbv").join("config.toml"))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// OAuth app credentials and the long-lived refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub app_key: String,
    pub app_secret: String,
    pub refresh_token: String,
}

/// Remote folders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Where processed files are uploaded
    pub postprocess_soundcloud: String,
    /// Where uploaded files are copied afterwards (optional)
    pub postprocess_archive: String,
    /// Raw live recordings waiting to be processed
    pub preprocess_live: String,
    /// Raw prerecorded shows waiting to be processed
    pub preprocess_prerecord: String,
}

/// Processing host channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipeConfig {
    /// Override for the command endpoint
    pub to_host: Option<PathBuf>,
    /// Override for the response endpoint
    pub from_host: Option<PathBuf>,
    /// Give up on a response after this many seconds (no limit if unset)
    pub response_timeout_secs: Option<u64>,
}

impl PipeConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs.map(Duration::from_secs)
    }
}

/// Chunked upload tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    pub chunk_size: u64,
    pub max_object_size: u64,
    /// Deadline for each individual network call (no limit if unset)
    pub chunk_timeout_secs: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
            chunk_timeout_secs: None,
        }
    }
}

impl UploadConfig {
    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(auth) = &self.auth {
            if auth.app_key.is_empty() || auth.app_secret.is_empty() || auth.refresh_token.is_empty()
            {
                return Err(Error::Config(
                    "auth config is missing required fields".to_string(),
                ));
            }
        }
        if self.upload.chunk_size == 0 {
            return Err(Error::Config("upload.chunk_size must be positive".to_string()));
        }
        if self.upload.chunk_size > self.upload.max_object_size {
            return Err(Error::Config(format!(
                "upload.chunk_size ({}) exceeds upload.max_object_size ({})",
                self.upload.chunk_size, self.upload.max_object_size
            )));
        }
        Ok(())
    }

    /// Credentials, or a config error naming what is missing.
    pub fn require_auth(&self) -> Result<&AuthConfig> {
        self.auth
            .as_ref()
            .ok_or_else(|| Error::Config("[auth] section is required".to_string()))
    }

    /// Upload folder, or a config error if unset.
    pub fn require_upload_dir(&self) -> Result<&str> {
        let dir = self.paths.postprocess_soundcloud.trim();
        if dir.is_empty() {
            return Err(Error::Config(
                "paths.postprocess_soundcloud is required".to_string(),
            ));
        }
        Ok(dir)
    }

    /// Folders to fetch pending recordings from, live first, each with the
    /// profile its files are processed with. Unset folders are left out.
    pub fn preprocess_folders(&self) -> Vec<(Profile, &str)> {
        [
            (Profile::Live, self.paths.preprocess_live.trim()),
            (Profile::Prerecord, self.paths.preprocess_prerecord.trim()),
        ]
        .into_iter()
        .filter(|(_, folder)| !folder.is_empty())
        .collect()
    }

    /// Like [`preprocess_folders`](Self::preprocess_folders), but a config
    /// error if none is set.
    pub fn require_preprocess_folders(&self) -> Result<Vec<(Profile, &str)>> {
        let folders = self.preprocess_folders();
        if folders.is_empty() {
            return Err(Error::Config(
                "paths.preprocess_live or paths.preprocess_prerecord is required".to_string(),
            ));
        }
        Ok(folders)
    }

    /// Write the config as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, text)?;
        Ok(())
    }
}

/// Join a remote folder and a file name with exactly one `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}
