use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::product::ProductContext;

/// Realtime AI service credentials and session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Instruction attached to the first `response.create` so the agent speaks first.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_api_version() -> String {
    "2024-10-01-preview".to_string()
}

fn default_greeting() -> String {
    "You are Aura, an AI sales agent. You can control the browser. Say hello and ask what I would like to see.".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: default_api_version(),
            greeting: default_greeting(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// "chrome", "edge" or "chromium".
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Explicit browser binary; discovered on PATH when unset.
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub headed: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_text_match_timeout_ms")]
    pub text_match_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_scroll_step_px")]
    pub scroll_step_px: i64,
    /// Navigation allow-list. Empty means unrestricted.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_jpeg_quality() -> u8 {
    50
}

fn default_launch_timeout_secs() -> u64 {
    15
}

fn default_action_timeout_ms() -> u64 {
    10_000
}

fn default_text_match_timeout_ms() -> u64 {
    2_000
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_scroll_step_px() -> i64 {
    500
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            executable: None,
            headed: false,
            window_width: default_window_width(),
            window_height: default_window_height(),
            jpeg_quality: default_jpeg_quality(),
            launch_timeout_secs: default_launch_timeout_secs(),
            action_timeout_ms: default_action_timeout_ms(),
            text_match_timeout_ms: default_text_match_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            scroll_step_px: default_scroll_step_px(),
            allowed_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_capture_interval_ms")]
    pub interval_ms: u64,
}

fn default_capture_interval_ms() -> u64 {
    2_000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_capture_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Product contexts keyed by product id.
    #[serde(default)]
    pub products: HashMap<String, ProductContext>,
}

const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            let config = Self::load(&config_path)?;
            debug!(path = %config_path.display(), products = config.products.len(), "Config loaded");
            Ok(config)
        } else {
            info!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Overlay realtime credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = read(ENV_ENDPOINT) {
            debug!(var = ENV_ENDPOINT, "Realtime setting taken from environment");
            self.realtime.endpoint = v;
        }
        if let Some(v) = read(ENV_API_KEY) {
            debug!(var = ENV_API_KEY, "Realtime setting taken from environment");
            self.realtime.api_key = v;
        }
        if let Some(v) = read(ENV_DEPLOYMENT) {
            debug!(var = ENV_DEPLOYMENT, "Realtime setting taken from environment");
            self.realtime.deployment = v;
        }
        if let Some(v) = read(ENV_API_VERSION) {
            debug!(var = ENV_API_VERSION, "Realtime setting taken from environment");
            self.realtime.api_version = v;
        }
    }

    /// Missing realtime credentials are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.realtime.endpoint.trim().is_empty() {
            missing.push(ENV_ENDPOINT);
        }
        if self.realtime.api_key.trim().is_empty() {
            missing.push(ENV_API_KEY);
        }
        if self.realtime.deployment.trim().is_empty() {
            missing.push(ENV_DEPLOYMENT);
        }
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing realtime configuration: {}",
                missing.join(", ")
            )));
        }
        if self.capture.interval_ms == 0 {
            return Err(Error::Config("capture.intervalMs must be positive".to_string()));
        }
        if self.browser.jpeg_quality == 0 || self.browser.jpeg_quality > 100 {
            return Err(Error::Config("browser.jpegQuality must be within 1..=100".to_string()));
        }
        Ok(())
    }
}
