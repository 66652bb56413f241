use mechbook_shared::Coordinates;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_request_timeout() -> u64 { 15 }
fn default_page_size() -> u32 { 20 }
fn default_max_pages() -> u32 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Bearer token issued by the auth service
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub refresh_interval_secs: u64,
    pub location_interval_secs: u64,
    pub location_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            location_interval_secs: 5,
            location_timeout_secs: 10,
        }
    }
}

/// Fixed position for hosts without positioning hardware
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeviceConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl DeviceConfig {
    pub fn position(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.latitude?, self.longitude?))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in; holds the developer's own token.
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MECHBOOK__AUTH__TOKEN=...`
            .add_source(config::Environment::with_prefix("MECHBOOK").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let polling = &self.polling;
        if polling.refresh_interval_secs == 0 || polling.location_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "polling intervals must be at least one second".to_string(),
            ));
        }
        if self.api.page_size == 0 || self.api.max_pages == 0 {
            return Err(config::ConfigError::Message(
                "api.page_size and api.max_pages must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
