use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

/// Where the daemon listens for the chat/player bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Now-playing panel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Seconds between background refresh ticks.  Kept long on purpose: the
    /// panel only shows durations, never a live position.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Controls detach when no render succeeds for this long.
    #[serde(default = "default_view_timeout_secs")]
    pub view_timeout_secs: u64,
    #[serde(default = "default_volume_step")]
    pub volume_step: u32,
    #[serde(default = "default_max_volume")]
    pub max_volume: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_view_timeout_secs")]
    pub view_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_bridge_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            view_timeout_secs: default_view_timeout_secs(),
            volume_step: default_volume_step(),
            max_volume: default_max_volume(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            view_timeout_secs: default_view_timeout_secs(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_threshold_secs: default_idle_threshold_secs(),
        }
    }
}

impl PanelConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn view_timeout(&self) -> Duration {
        Duration::from_secs(self.view_timeout_secs)
    }
}

impl QueueConfig {
    pub fn view_timeout(&self) -> Duration {
        Duration::from_secs(self.view_timeout_secs)
    }
}

impl ReaperConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> u16 {
    platform::BRIDGE_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8989
}

fn default_refresh_interval_secs() -> u64 {
    120
}

fn default_view_timeout_secs() -> u64 {
    300
}

fn default_volume_step() -> u32 {
    10
}

fn default_max_volume() -> u32 {
    150
}

fn default_page_size() -> usize {
    10
}

fn default_sweep_interval_secs() -> u64 {
    15
}

fn default_idle_threshold_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.queue.page_size == 0 {
            anyhow::bail!("queue.page_size must be at least 1");
        }
        if self.panel.max_volume == 0 {
            anyhow::bail!("panel.max_volume must be at least 1");
        }
        Ok(())
    }
}
