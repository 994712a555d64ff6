//! Configuration management for the context router.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use crate::dispatcher::{backend_ids, BackendCommand};
use crate::profiles::AttributeProfile;
use crate::render::RenderMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Command overrides keyed by backend id
    #[serde(default)]
    pub backends: BTreeMap<String, BackendCommandConfig>,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether capturing is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Overall budget for one capture
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_ms: u64,

    /// Whether transient UI selection text may be included
    #[serde(default)]
    pub include_selection_text: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
            capture_timeout_ms: default_capture_timeout(),
            include_selection_text: false,
        }
    }
}

/// Per-tier invocation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_browser_timeout")]
    pub browser_ms: u64,

    #[serde(default = "default_accessibility_timeout")]
    pub accessibility_ms: u64,

    #[serde(default = "default_ocr_timeout")]
    pub ocr_ms: u64,

    /// Per-target timeout for diagnostics pings
    #[serde(default = "default_ping_timeout")]
    pub ping_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            browser_ms: default_browser_timeout(),
            accessibility_ms: default_accessibility_timeout(),
            ocr_ms: default_ocr_timeout(),
            ping_ms: default_ping_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn browser(&self) -> Duration {
        Duration::from_millis(self.browser_ms)
    }

    pub fn accessibility(&self) -> Duration {
        Duration::from_millis(self.accessibility_ms)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_millis(self.ocr_ms)
    }

    pub fn ping(&self) -> Duration {
        Duration::from_millis(self.ping_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Minimum trimmed characters for a browser capture to count
    #[serde(default = "default_browser_min_chars")]
    pub browser_min_chars: usize,

    /// Default minimum trimmed characters for accessibility extraction
    #[serde(default = "default_accessibility_min_chars")]
    pub accessibility_min_chars: usize,

    /// Per-app overrides, checked before the built-in table
    #[serde(default)]
    pub app_profiles: Vec<AppProfileConfig>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            browser_min_chars: default_browser_min_chars(),
            accessibility_min_chars: default_accessibility_min_chars(),
            app_profiles: Vec::new(),
        }
    }
}

/// One per-app threshold override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppProfileConfig {
    /// Bundle ID or app name (supports wildcards)
    pub pattern: String,

    pub minimum_chars: usize,

    #[serde(default)]
    pub attribute_profile: AttributeProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Bridge ids to try first, in order, before the default order
    #[serde(default)]
    pub priority: Vec<String>,

    /// Extra Chromium-family bundle IDs
    #[serde(default)]
    pub extra_chromium_apps: Vec<String>,

    /// Extra WebKit apps served by the Safari bridges
    #[serde(default)]
    pub extra_safari_apps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCommandConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: RenderMode,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capture_timeout() -> u64 {
    8_000
}

fn default_browser_timeout() -> u64 {
    1_200
}

fn default_accessibility_timeout() -> u64 {
    1_500
}

fn default_ocr_timeout() -> u64 {
    2_500
}

fn default_ping_timeout() -> u64 {
    800
}

fn default_browser_min_chars() -> usize {
    1
}

fn default_accessibility_min_chars() -> usize {
    240
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("context-router")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Resolve the command for every known backend, applying overrides
    pub fn backend_commands(&self) -> BTreeMap<String, BackendCommand> {
        let mut commands: BTreeMap<String, BackendCommand> = backend_ids::ALL
            .iter()
            .map(|id| (id.to_string(), BackendCommand::new(default_binary_path(default_binary_name(id)))))
            .collect();

        for (id, command) in &self.backends {
            commands.insert(
                id.clone(),
                BackendCommand::new(&command.command).with_args(command.args.iter().cloned()),
            );
        }
        commands
    }
}

/// Executable name shipped for each backend id
fn default_binary_name(backend: &str) -> &'static str {
    match backend {
        backend_ids::SAFARI => "safari-bridge",
        backend_ids::SAFARI_LIVE => "safari-live-extract",
        backend_ids::CHROME => "chrome-bridge",
        backend_ids::CHROME_LIVE => "chrome-live-extract",
        backend_ids::DESKTOP_AX => "ax-extractor",
        backend_ids::DESKTOP_OCR => "ocr-extractor",
        _ => "context-backend",
    }
}

/// Locate a backend binary next to the running executable or in system paths
fn default_binary_path(name: &str) -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    let paths = [
        exe_dir.join(name),
        PathBuf::from("/usr/local/bin").join(name),
        PathBuf::from("/opt/homebrew/bin").join(name),
    ];

    for path in paths {
        if path.exists() {
            return path;
        }
    }

    // Fall back to PATH lookup at spawn time
    PathBuf::from(name)
}
