//! Client configuration.
//!
//! Layers, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. `<config dir>/compredict/client.toml`
//! 3. `COMPREDICT_AI_CORE_*` environment variables (empty values ignored)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::crypto::KeyMaterial;
use crate::error::Error;
use crate::token::API_KEY_LEN;
use crate::transport::DEFAULT_TIMEOUT_SECS;

pub const DEFAULT_API_BASE: &str = "https://core.compredict.ai/api/";

pub const ENV_API_KEY: &str = "COMPREDICT_AI_CORE_KEY";
pub const ENV_BASE_URL: &str = "COMPREDICT_AI_CORE_BASE_URL";
pub const ENV_CALLBACK: &str = "COMPREDICT_AI_CORE_CALLBACK";
pub const ENV_FAIL_ON_ERROR: &str = "COMPREDICT_AI_CORE_FAIL_ON_ERROR";
pub const ENV_PRIVATE_KEY: &str = "COMPREDICT_AI_CORE_PPK";
pub const ENV_PASSPHRASE: &str = "COMPREDICT_AI_CORE_PASSPHRASE";

#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every endpoint is resolved against.
    pub api_base: String,
    /// Static 40-character API key. Absent when tokens come from `generate_token`.
    pub api_key: Option<String>,
    /// Callback applied to job requests that don't name one.
    pub callback_url: Option<String>,
    pub fail_on_error: bool,
    pub verify_peer: bool,
    /// PEM RSA key used for payload encryption.
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            callback_url: None,
            fail_on_error: false,
            verify_peer: true,
            private_key_path: None,
            passphrase: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("callback_url", &self.callback_url)
            .field("fail_on_error", &self.fail_on_error)
            .field("verify_peer", &self.verify_peer)
            .field("private_key_path", &self.private_key_path)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Returns the path to the config file, if a config directory exists.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("compredict/client.toml"))
}

impl ClientConfig {
    /// Config with an explicit API key and everything else defaulted.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Load from the standard file location (if present) and the environment.
    pub fn load() -> Result<Self, Error> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file plus the environment.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Overlay environment values. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(base) = get(ENV_BASE_URL) {
            self.api_base = base;
        }
        if let Some(callback) = get(ENV_CALLBACK) {
            self.callback_url = Some(callback);
        }
        if let Some(flag) = get(ENV_FAIL_ON_ERROR) {
            self.fail_on_error = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(path) = get(ENV_PRIVATE_KEY) {
            self.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(pass) = get(ENV_PASSPHRASE) {
            self.passphrase = Some(pass);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(key) = &self.api_key {
            if key.chars().count() != API_KEY_LEN {
                return Err(Error::Configuration("API Key is not in valid format!".into()));
            }
        }
        if self.api_base.trim().is_empty() {
            return Err(Error::Configuration("api_base must not be empty".into()));
        }
        Ok(())
    }

    /// `api_base` with exactly one trailing slash, ready for endpoint joins.
    pub fn normalized_base(&self) -> String {
        format!("{}/", self.api_base.trim_end_matches('/'))
    }

    /// Read the configured private key, if any.
    pub fn key_material(&self) -> Result<Option<KeyMaterial>, Error> {
        match &self.private_key_path {
            Some(path) => KeyMaterial::from_pem_file(path, self.passphrase.as_deref()).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const KEY: &str = "0123456789abcdef0123456789abcdef01234567";

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base, "https://core.compredict.ai/api/");
        assert!(!config.fail_on_error);
        assert!(config.verify_peer);
        assert_eq!(config.timeout_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_path_location() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("compredict/client.toml"));
        }
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fail_on_error = true").unwrap();
        writeln!(file, "callback_url = \"https://cb.example.com\"").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert!(config.fail_on_error);
        assert_eq!(config.callback_url.as_deref(), Some("https://cb.example.com"));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fail_on_error = [").unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ClientConfig {
            api_base: "https://file.example.com/api/".into(),
            ..ClientConfig::default()
        };
        config.apply_env(env_of(&[
            (ENV_API_KEY, KEY),
            (ENV_BASE_URL, "https://env.example.com/api/"),
            (ENV_FAIL_ON_ERROR, "True"),
            (ENV_PRIVATE_KEY, "/keys/ppk.pem"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some(KEY));
        assert_eq!(config.api_base, "https://env.example.com/api/");
        assert!(config.fail_on_error);
        assert_eq!(config.private_key_path, Some(PathBuf::from("/keys/ppk.pem")));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = ClientConfig::with_api_key(KEY);
        config.apply_env(env_of(&[(ENV_API_KEY, ""), (ENV_BASE_URL, "")]));
        assert_eq!(config.api_key.as_deref(), Some(KEY));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_invalid_api_key() {
        let err = ClientConfig::with_api_key("only_couple_of_chars").validate().unwrap_err();
        assert_eq!(err.to_string(), "API Key is not in valid format!");
    }

    #[test]
    fn test_normalized_base() {
        let mut config = ClientConfig::default();
        config.api_base = "http://localhost:8000/api".into();
        assert_eq!(config.normalized_base(), "http://localhost:8000/api/");
        config.api_base = "http://localhost:8000/api//".into();
        assert_eq!(config.normalized_base(), "http://localhost:8000/api/");
    }

    #[test]
    fn test_key_material_missing_file_is_io() {
        let config = ClientConfig {
            private_key_path: Some(PathBuf::from("/definitely/not/here.pem")),
            ..ClientConfig::default()
        };
        assert!(matches!(config.key_material(), Err(Error::Io(_))));
        assert!(ClientConfig::default().key_material().unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::with_api_key(KEY);
        assert!(!format!("{:?}", config).contains(KEY));
    }
}
