//! Configuration management
//!
//! Manages agent configuration: audio capture, wake word, routing, budget,
//! voice, and the function security lists. Stored as TOML under the
//! platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::Mode;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture PCM rate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Capture channel count
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    /// Name used by the external wake source
    #[serde(default = "default_wake_keyword")]
    pub keyword: String,
    /// External wake tuning
    #[serde(default = "default_wake_sensitivity")]
    pub sensitivity: f32,
}

fn default_wake_keyword() -> String {
    "jarvis".to_string()
}

fn default_wake_sensitivity() -> f32 {
    0.5
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            keyword: default_wake_keyword(),
            sensitivity: default_wake_sensitivity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routing fallback when no rule fires
    #[serde(default = "default_mode")]
    pub default_mode: Mode,
    #[serde(default = "default_peak_start")]
    pub peak_hours_start: u32,
    #[serde(default = "default_peak_end")]
    pub peak_hours_end: u32,
    /// Daily-usage percentage that forces efficient routing
    #[serde(default = "default_budget_threshold")]
    pub budget_threshold_pct: f64,
}

fn default_mode() -> Mode {
    Mode::Premium
}

fn default_peak_start() -> u32 {
    9
}

fn default_peak_end() -> u32 {
    17
}

fn default_budget_threshold() -> f64 {
    50.0
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            peak_hours_start: default_peak_start(),
            peak_hours_end: default_peak_end(),
            budget_threshold_pct: default_budget_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily spending limit in USD
    #[serde(default = "default_daily_budget")]
    pub daily_budget: f64,
    /// Monthly spending limit in USD
    #[serde(default = "default_monthly_budget")]
    pub monthly_budget: f64,
}

fn default_daily_budget() -> f64 {
    1.0
}

fn default_monthly_budget() -> f64 {
    30.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: default_daily_budget(),
            monthly_budget: default_monthly_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Backend voice selector; provider default when unset
    #[serde(default)]
    pub name: Option<String>,
    /// TTS rate multiplier
    #[serde(default = "default_voice_speed")]
    pub speed: f32,
}

fn default_voice_speed() -> f32 {
    1.0
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            name: None,
            speed: default_voice_speed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Functions that must pass the confirmation channel
    #[serde(default = "default_require_confirmation")]
    pub require_confirmation: Vec<String>,
    /// Functions that always fail with Blocked
    #[serde(default = "default_blocked")]
    pub blocked: Vec<String>,
}

fn default_require_confirmation() -> Vec<String> {
    vec![
        "delete_file".to_string(),
        "modify_system_settings".to_string(),
        "uninstall_application".to_string(),
        "modify_registry".to_string(),
    ]
}

fn default_blocked() -> Vec<String> {
    vec![
        "access_credentials".to_string(),
        "modify_admin_protected".to_string(),
        "run_arbitrary_powershell".to_string(),
    ]
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_confirmation: default_require_confirmation(),
            blocked: default_blocked(),
        }
    }
}

/// Provider endpoints; overridable for proxies and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    #[serde(default = "default_reason_model")]
    pub reason_model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string()
}

fn default_reason_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            realtime_url: default_realtime_url(),
            reason_model: default_reason_model(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "vox-agent", "vox-agent")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "vox-agent", "vox-agent")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}
