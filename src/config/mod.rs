// Configuration module entry point
// Loads configuration from file and environment

mod types;

use std::collections::HashMap;
use std::net::SocketAddr;

// Re-export public types
pub use types::{
    BuildConfig, BuildTargetConfig, Config, LoggingConfig, MiddlewareConfig, ServerConfig,
};

/// Default config file (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_PATH: &str = "devserve";

impl Config {
    /// Load configuration from specified file path (without extension).
    /// The file is optional; `DEVSERVE_*` environment variables override it,
    /// with `__` separating nested keys (`DEVSERVE_SERVER__PORT=9000`).
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        Self::load_with_env(config_path, None)
    }

    /// Like `load_from`, reading variables from `env` instead of the process
    /// environment when given
    fn load_with_env(
        config_path: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let environment = config::Environment::with_prefix("DEVSERVE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(environment)
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.keep_alive", true)?
            .set_default("server.request_timeout", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("middleware.lazy", false)?
            .set_default("middleware.index", "index.html")?
            .set_default("build.output_path", "/")?
            .build()?;

        settings.try_deserialize()
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(content: &str, env: &[(&str, &str)]) -> Config {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("devserve.toml"), content).unwrap();
        let path = dir.path().join("devserve");
        let env = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::load_with_env(path.to_str().unwrap(), Some(env)).unwrap()
    }

    fn load_toml(content: &str) -> Config {
        load(content, &[])
    }

    #[test]
    fn test_defaults() {
        let cfg = load_toml("");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.server.keep_alive);
        assert_eq!(cfg.logging.access_log_format, "combined");
        assert!(!cfg.middleware.lazy);
        assert_eq!(cfg.middleware.index, "index.html");
        assert_eq!(cfg.middleware.methods, vec!["GET", "HEAD"]);
        assert_eq!(cfg.build.output_path, "/");
        assert!(cfg.build.configs.is_empty());
        assert_eq!(cfg.get_socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_env_override() {
        let cfg = load(
            "[server]\nport = 3000\n",
            &[
                ("DEVSERVE_SERVER__PORT", "9000"),
                ("DEVSERVE_MIDDLEWARE__LAZY", "true"),
                ("DEVSERVE_BUILD__OUTPUT_PATH", "/dist"),
            ],
        );
        assert_eq!(cfg.server.port, 9000);
        assert!(cfg.middleware.lazy);
        assert_eq!(cfg.build.output_path, "/dist");
    }

    #[test]
    fn test_composite_build() {
        let cfg = load_toml(
            r#"
[middleware]
public_path = "/"
lazy = true
filename = "bundle\\.js$"

[middleware.headers]
X-Served-By = "devserve"

[build]
output_path = "/out"

[[build.configs]]
name = "client"
source_dir = "web"
output_path = "/out/client"
public_path = "/static/"

[[build.configs]]
name = "admin"
source_dir = "admin"
output_path = "/out/admin"
public_path = "/admin/"
"#,
        );
        assert!(cfg.middleware.lazy);
        assert_eq!(cfg.middleware.filename.as_deref(), Some("bundle\\.js$"));
        assert_eq!(cfg.middleware.headers.len(), 1);
        assert_eq!(cfg.build.configs.len(), 2);
        assert_eq!(cfg.build.configs[1].public_path.as_deref(), Some("/admin/"));
    }
}
