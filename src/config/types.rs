// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub middleware: MiddlewareConfig,
    pub build: BuildConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: bool,
    /// Upper bound for serving one connection, in seconds
    pub request_timeout: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common or json)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Request handling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MiddlewareConfig {
    /// URL prefix the build output is served under
    #[serde(default)]
    pub public_path: Option<String>,
    /// Build on demand instead of once at startup
    pub lazy: bool,
    /// Regex; in lazy mode only matching filenames trigger a rebuild
    #[serde(default)]
    pub filename: Option<String>,
    /// File served for directory requests; empty disables the lookup
    pub index: String,
    /// Extra headers added to every served file
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Content-Type overrides keyed by extension
    #[serde(default)]
    pub mime_types: HashMap<String, String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

/// Build configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Top-level output path; must be absolute
    pub output_path: String,
    /// Source directory of a single build
    #[serde(default)]
    pub source_dir: Option<String>,
    #[serde(default)]
    pub public_path: Option<String>,
    /// Several builds served side by side; non-empty makes the build composite
    #[serde(default)]
    pub configs: Vec<BuildTargetConfig>,
}

/// One build of a composite setup
#[derive(Debug, Deserialize, Clone)]
pub struct BuildTargetConfig {
    pub name: String,
    pub source_dir: String,
    pub output_path: String,
    #[serde(default)]
    pub public_path: Option<String>,
}
