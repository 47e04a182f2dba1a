use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub process: ProcessConfig,
    pub renderer: RendererConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub allowed_origin: String,
}

/// Remote GeoDataSource reached over HTTP.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Relay the upstream status code on non-2xx instead of collapsing to 500.
    pub pass_through_status: bool,
}

/// Local GeoDataSource invoked once per request.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RendererConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3001,
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 30,
            pass_through_status: false,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["./geocoding.py".to_string()],
            working_dir: None,
            timeout_secs: 120,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3001/api/country_fire_map".to_string(),
            timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Reads `path` if it exists (defaults otherwise), then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            info!("Config file {:?} not found, using defaults", path);
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        override_from_env("FIRE_MAP_BIND", &mut self.server.bind);
        override_from_env("FIRE_MAP_PORT", &mut self.server.port);
        override_from_env("FIRE_MAP_ALLOWED_ORIGIN", &mut self.server.allowed_origin);
        override_from_env("FIRE_MAP_UPSTREAM_URL", &mut self.upstream.base_url);
        override_from_env("FIRE_MAP_UPSTREAM_TIMEOUT", &mut self.upstream.timeout_secs);
        override_from_env("FIRE_MAP_PROCESS_PROGRAM", &mut self.process.program);
        override_from_env("FIRE_MAP_PROCESS_TIMEOUT", &mut self.process.timeout_secs);
        override_from_env("FIRE_MAP_RENDERER_ENDPOINT", &mut self.renderer.endpoint);
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T)
where
    T::Err: Display,
{
    let Ok(raw) = env::var(key) else {
        return;
    };

    match raw.parse() {
        Ok(value) => {
            info!("{key} set, overriding config");
            *target = value;
        }
        Err(e) => warn!("Invalid {key} value {raw:?}: {e}, keeping configured value"),
    }
}
