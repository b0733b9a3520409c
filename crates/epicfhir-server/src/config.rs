use epicfhir_auth::EpicConfig;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Epic authorization server, keys and cookie settings
    #[serde(default)]
    pub epic: EpicConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// FHIR List search parameters
    #[serde(default)]
    pub fhir: FhirProxyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Storage validation
        if self.storage.backend == StorageBackend::Postgres {
            let Some(ref pg) = self.storage.postgres else {
                return Err("storage.backend=postgres requires storage.postgres".into());
            };
            if pg.url.is_empty() {
                return Err("storage.postgres.url must not be empty".into());
            }
            if pg.pool_size == 0 {
                return Err("storage.postgres.pool_size must be > 0".into());
            }
        }
        if self.fhir.list_code.is_empty() {
            return Err("fhir.list_code must not be empty".into());
        }
        self.epic
            .validate()
            .map_err(|e| format!("epic config error: {e}"))?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Time allowed for in-flight requests to finish after a shutdown signal.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Derive the callback host from `X-Forwarded-Host`/`X-Forwarded-Proto`.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Apply the `epic_users` migration at startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_pool_size() -> u32 {
    10
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}

impl PostgresConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parameters of the FHIR `List` searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FhirProxyConfig {
    pub list_code: String,
    pub list_status: String,
    /// e.g. `Practitioner/123`; omitted from the search when empty.
    pub list_subject: String,
    pub system_lists_identifier: String,
    pub user_lists_identifier: String,
}

impl Default for FhirProxyConfig {
    fn default() -> Self {
        Self {
            list_code: "patients".into(),
            list_status: "current".into(),
            list_subject: String::new(),
            system_lists_identifier: "urn:oid:1.2.840.114350.1.13.0.1.7.2.806567|5332".into(),
            user_lists_identifier: "urn:oid:1.2.840.114350.1.13.0.1.7.2.698283|9192".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("epicfhir.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., EPICFHIR__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("EPICFHIR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
