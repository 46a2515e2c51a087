//! Runtime configuration.
//!
//! Loaded once at startup from the environment (with `.env` support for
//! development). All knobs have workable defaults so a bare `banter serve`
//! comes up on localhost.

use serde::Deserialize;
use std::net::IpAddr;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global configuration.
///
/// # Panics
/// Panics if [`init`] has not run yet.
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("config not initialized; call banter_common::config::init() first")
}

/// Initialize the global configuration from the environment.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env if present (development).
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        .set_default("port", 3000)?
        .set_default("rtc_min_port", 40_000)?
        .set_default("rtc_max_port", 49_999)?
        .set_default("announced_ip", "127.0.0.1")?
        .set_default("data_file", "banter.json")?
        .add_source(config::Environment::default().try_parsing(true))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// HTTP + websocket listen port (`PORT`).
    pub port: u16,
    /// Extra allowed CORS origin (`FRONTEND_URL`); the local Vite dev
    /// server is always allowed.
    pub frontend_url: Option<String>,
    /// Low end of the media port range (`RTC_MIN_PORT`).
    pub rtc_min_port: u16,
    /// High end of the media port range (`RTC_MAX_PORT`).
    pub rtc_max_port: u16,
    /// IP advertised in ICE candidates (`ANNOUNCED_IP`).
    pub announced_ip: IpAddr,
    /// Path of the persisted JSON document (`DATA_FILE`).
    pub data_file: String,
}
