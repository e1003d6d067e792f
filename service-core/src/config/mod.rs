use crate::error::CoreError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service built on this core.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, CoreError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: Config = config.try_deserialize()?;
        if config.log_level.trim().is_empty() {
            return Err(CoreError::config("log_level must not be empty"));
        }
        Ok(config)
    }
}
