//! Configuration loading.
//!
//! The raw `config::Config` source is loaded once into a process-wide
//! `OnceCell`, matching the teacher's global-config pattern. `AppConfig` is
//! parsed from it once at startup into a typed struct so the rest of the
//! crate never touches stringly-typed `get_string`/`get_int` lookups.

pub use config::Config;
pub use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::error::Error;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .add_source(config::Environment::with_prefix("RXINDEXER").separator("__"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .add_source(config::Environment::with_prefix("RXINDEXER").separator("__"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Typed view over the config fields named in the external-interfaces
/// section of the spec. Parsed once from the raw `Config` source.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db_path: String,

    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub rpc_timeout_secs: u64,

    pub rpc_pool_size: usize,
    pub rpc_rate_limit_rps: u32,
    pub rpc_min_request_interval_ms: u64,

    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout_secs: u64,
    pub circuit_half_open_timeout_secs: u64,

    pub sync_batch_size: usize,
    pub sync_workers: usize,
    pub block_parallel_threshold: usize,
    pub checkpoint_interval: u64,

    pub reorg_limit: u32,

    pub refresh_min_interval_secs: u64,

    #[serde(default)]
    pub progressive_sync: bool,
    #[serde(default)]
    pub initial_sync_minimal: bool,

    #[serde(default = "default_http_bind")]
    pub http_bind: String,
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn Error>> {
        config
            .clone()
            .try_deserialize::<AppConfig>()
            .map_err(|e| format!("invalid configuration: {}", e).into())
    }
}
