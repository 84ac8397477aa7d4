//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binary)
//!
//! The upstream API key is kept apart from [`Config`] in an [`ApiKey`] so it
//! never ends up in a serialized config or a debug log line.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Environment variable holding the upstream API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Diagnostic output configuration
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config_dir>/chat-relay/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("chat-relay").join("config.toml"))
    }

    /// Load layered configuration: defaults, then the TOML file, then the
    /// environment.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used only if a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };

        Ok(base.with_env())
    }

    /// Apply `CHAT_RELAY_*` environment overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(upstream) = std::env::var("CHAT_RELAY_UPSTREAM") {
            self.proxy.upstream_url = upstream;
        }
        if let Ok(port) = std::env::var("CHAT_RELAY_PORT") {
            if let Ok(port) = port.parse() {
                self.proxy.port = port;
            }
        }
        if let Ok(host) = std::env::var("CHAT_RELAY_HOST") {
            self.proxy.host = host;
        }
        if let Ok(prefix) = std::env::var("CHAT_RELAY_STRIP_PREFIX") {
            self.proxy.stripped_header_prefix = prefix;
        }

        if let Some(val) = env_flag("CHAT_RELAY_ACCUMULATE_TEXT") {
            self.diagnostics.accumulate_text = val;
        }
        if let Some(val) = env_flag("CHAT_RELAY_COLOR") {
            self.diagnostics.color = val;
        }

        self
    }
}

/// Load a `.env` file into the process environment.
///
/// `None` looks in the working directory. Variables already set win, and a
/// missing file is not an error. Must run before [`Config::load`] so that
/// `CHAT_RELAY_*` values from the file are applied.
pub fn load_dotenv(path: Option<&Path>) {
    let result = match path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };

    if let Err(e) = result {
        if !e.not_found() {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Full upstream chat-completions URL
    pub upstream_url: String,

    /// Path of the single inbound endpoint
    pub endpoint: String,

    /// Inbound headers whose name starts with this prefix are not forwarded
    pub stripped_header_prefix: String,

    /// Upstream connect timeout in seconds (the stream itself is unbounded)
    pub connect_timeout_secs: u64,

    /// Maximum inbound request body size in bytes
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            upstream_url: "https://api.openai.com/v1/chat/completions".to_string(),
            endpoint: "/v1/chat/completions".to_string(),
            stripped_header_prefix: "Posit".to_string(),
            connect_timeout_secs: 30,
            max_body_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl ProxyConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Diagnostic output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Concatenate detected text deltas and print them after the stream
    pub accumulate_text: bool,

    /// Print a pretty-printed copy of every forwarded data chunk
    pub pretty_print: bool,

    /// Emit ANSI colors
    pub color: bool,

    /// Forward blank SSE lines instead of dropping them
    pub preserve_blank_lines: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            accumulate_text: false,
            pretty_print: true,
            color: true,
            preserve_blank_lines: true,
        }
    }
}

/// Upstream API key.
///
/// Loaded once at startup, read-only afterwards. `Debug` never prints the
/// secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, rejecting blank values
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let key = key.trim();
        if key.is_empty() {
            return Err(RelayError::Config(format!(
                "{API_KEY_ENV} is not set in the environment"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// Resolve the key from an explicit value, falling back to
    /// `OPENAI_API_KEY`. Call [`load_dotenv`] first for `.env` support.
    pub fn resolve(explicit: Option<String>) -> Result<Self> {
        if let Some(key) = explicit {
            return Self::new(key);
        }

        let key = std::env::var(API_KEY_ENV).map_err(|_| {
            RelayError::Config(format!("{API_KEY_ENV} is not set in the environment"))
        })?;
        Self::new(key)
    }

    /// Value for the outbound `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}
