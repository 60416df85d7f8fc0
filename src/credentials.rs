//! Credential provider
//!
//! Supplies the API key and voice identifier, queried at backend
//! instantiation. The default provider tries the OS keyring, then the
//! environment, then a restricted file under the config directory.

use anyhow::{Context, Result};
use std::path::PathBuf;

const SERVICE_NAME: &str = "vox-agent";
const API_KEY_USERNAME: &str = "openai-api-key";
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const API_KEY_FILE: &str = "api_key.txt";

/// Source of API keys and voice identifiers
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Result<String>;

    /// Preferred voice identifier, if the provider knows one
    fn voice(&self) -> Option<String> {
        None
    }
}

/// Keyring-backed provider with env and file fallbacks
#[derive(Debug, Clone, Default)]
pub struct KeyringCredentials;

impl KeyringCredentials {
    pub fn new() -> Self {
        Self
    }

    fn key_file_path() -> Result<PathBuf> {
        let base = directories::ProjectDirs::from("com", "vox-agent", "vox-agent")
            .context("failed to get project directories")?;
        Ok(base.config_dir().join(API_KEY_FILE))
    }

    /// Store the key in the keyring, falling back to a 0600 file
    pub fn store_api_key(key: &str) -> Result<()> {
        if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
            if entry.set_password(key).is_ok() {
                return Ok(());
            }
        }
        let path = Self::key_file_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        std::fs::write(&path, key).context("failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("failed to set key file permissions")?;
        }
        Ok(())
    }
}

impl CredentialProvider for KeyringCredentials {
    fn api_key(&self) -> Result<String> {
        if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
            if let Ok(key) = entry.get_password() {
                return Ok(key);
            }
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }
        let path = Self::key_file_path()?;
        let key = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "no API key found; set {} or write {}",
                API_KEY_ENV,
                path.display()
            )
        })?;
        Ok(key.trim().to_string())
    }
}

/// Fixed credentials for tests and embedding hosts
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    key: String,
    voice: Option<String>,
}

impl StaticCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self) -> Result<String> {
        if self.key.is_empty() {
            anyhow::bail!("no API key configured");
        }
        Ok(self.key.clone())
    }

    fn voice(&self) -> Option<String> {
        self.voice.clone()
    }
}
