//! Configuration file support for livepreview.
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/livepreview/config.toml`
//! - macOS: `~/Library/Application Support/livepreview/config.toml`
//! - Windows: `%APPDATA%\livepreview\config.toml`
//!
//! Every section is optional; missing keys fall back to defaults.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default quiescence window before a burst of edits is compiled.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default port for the HTTP API.
pub const DEFAULT_HTTP_PORT: u16 = 1607;

const MIN_DEBOUNCE: Duration = Duration::from_millis(1);
const MAX_DEBOUNCE: Duration = Duration::from_secs(10);
/// Upper bound for `max_render_depth`; lowering and rendering recurse per level.
const MAX_RENDER_DEPTH: usize = 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Compilation pipeline settings
    pub compiler: CompilerSettings,
    /// Guest engine limits
    pub sandbox: SandboxLimits,
    /// HTTP API settings
    pub server: ServerSettings,
    /// External toolchain renderer settings
    pub toolchain: ToolchainSettings,
}

impl PreviewConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PreviewConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(Error::Config(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "livepreview") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let debounce = self.compiler.debounce;
        if !(MIN_DEBOUNCE..=MAX_DEBOUNCE).contains(&debounce) {
            return Err(Error::Config(format!(
                "compiler.debounce must be between {} and {}, got {}",
                humantime::format_duration(MIN_DEBOUNCE),
                humantime::format_duration(MAX_DEBOUNCE),
                humantime::format_duration(debounce)
            )));
        }
        if self.sandbox.max_timers == 0 {
            return Err(Error::Config("sandbox.max_timers must be at least 1".to_string()));
        }
        let depth = self.sandbox.max_render_depth;
        if !(1..=MAX_RENDER_DEPTH).contains(&depth) {
            return Err(Error::Config(format!(
                "sandbox.max_render_depth must be between 1 and {}, got {}",
                MAX_RENDER_DEPTH, depth
            )));
        }
        if self.toolchain.dev.is_empty() {
            return Err(Error::Config("toolchain.dev must name a command".to_string()));
        }
        Ok(())
    }

    /// Create a default config file with comments
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# livepreview configuration file

[compiler]
# Quiescence window: edits arriving faster than this are compiled once
debounce = "300ms"

[sandbox]
# Rhai operations allowed per evaluation (stops runaway loops)
max_operations = 5000000
max_call_levels = 64
max_expr_depth = 256
max_string_size = 1048576
max_array_size = 100000
max_map_size = 100000
# Live timers a guest may hold before set_timeout/set_interval fail
max_timers = 64
# Deepest element nesting in markup and in rendered output
max_render_depth = 256

[server]
port = 1607

[toolchain]
# Commands run inside the generated project directory
install = ["npm", "install"]
dev = ["npm", "run", "dev"]
ready_timeout = "2m"
"#;

        fs::write(path, content)?;
        Ok(())
    }
}

/// Compilation pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Debounce window
    #[serde(with = "duration_format")]
    pub debounce: Duration,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

/// Resource limits applied to every guest engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_timers: usize,
    /// Deepest element nesting, both in markup literals and in rendered trees
    pub max_render_depth: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_expr_depth: 256,
            max_string_size: 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_timers: 64,
            max_render_depth: 256,
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// External toolchain renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// Dependency install command; empty to skip
    pub install: Vec<String>,
    /// Dev server command
    pub dev: Vec<String>,
    /// How long to wait for the dev server to print its URL
    #[serde(with = "duration_format")]
    pub ready_timeout: Duration,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            install: vec!["npm".to_string(), "install".to_string()],
            dev: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            ready_timeout: Duration::from_secs(120),
        }
    }
}

/// Parse a human-readable duration such as `"250ms"` or `"2m"`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| Error::Duration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Serde adapter storing durations as humantime strings.
mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
