//! On-disk configuration for the jcrypt client.

use crate::cmd::GpgConfig;
use crate::error::JcryptError;
use jcrypt_pipe::WriteOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "JCRYPT_CONFIG";

/// Client configuration, read from JSON.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JcryptConfig {
    /// Override gpg binary location (None = auto-discover).
    pub gpg_path: Option<PathBuf>,

    /// gpg flags shared by every operation.
    #[serde(flatten)]
    pub gpg: GpgConfig,

    /// Destination file write options.
    pub write_options: WriteOptions,
}

impl JcryptConfig {
    /// Create a new `JcryptConfig` with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location: `$JCRYPT_CONFIG`, else
    /// `<config dir>/jcrypt/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("jcrypt").join("config.json"))
    }

    /// Loads `path`, or the default location when `path` is `None`.
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::ConfigRead` or `JcryptError::ConfigParse` if the
    /// file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, JcryptError> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let config = serde_json::from_str(&text)
                    .map_err(|source| JcryptError::ConfigParse { path: path.clone(), source })?;
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(JcryptError::ConfigRead { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jcrypt_pipe::WriteFlags;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = JcryptConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, JcryptConfig::default());
        assert!(config.gpg.armor);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "recipients": ["4406864D"],
                "sign": true,
                "write_options": { "flags": "append", "mode": 420 }
            }"#,
        )
        .unwrap();

        let config = JcryptConfig::load(Some(&path)).unwrap();
        assert_eq!(config.gpg.recipients, ["4406864D"]);
        assert!(config.gpg.sign);
        assert!(config.gpg.armor);
        assert_eq!(config.write_options.flags, WriteFlags::Append);
        assert_eq!(config.write_options.mode, 0o644);
        assert!(config.gpg_path.is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JcryptConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, JcryptError::ConfigParse { .. }));
    }
}
