mod basic;
mod gateway;
pub mod wire;

pub use basic::BasicConfig;
pub use gateway::{GatewayConfig, GatewayResolvedConfig};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Dispatch engine settings (see `gateway` table in config.toml).
    #[serde(default)]
    pub gateway: GatewayConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present.
    ///
    /// Note: this does **not** validate required fields like
    /// `basic.castor_key`. The `serve` path calls [`Config::from_toml`]
    /// instead to avoid running with insecure defaults.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration and validates the fields `serve` requires.
    pub fn from_toml() -> Self {
        let cfg: Self = Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration from {DEFAULT_CONFIG_FILE}: {err}")
        });
        if cfg.basic.castor_key.trim().is_empty() {
            panic!("basic.castor_key must be set and non-empty");
        }
        cfg
    }

    pub fn gateway(&self) -> GatewayResolvedConfig {
        self.gateway.resolve()
    }
}
