use config::{Config as ConfigTree, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENVIRONMENT_PREFIX: &str = "RELAY_QUERY";
const CONFIG_SEPARATOR: &str = "__";

/// Upper bound for any configured timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeSettings {
    pub local_addr: String,
    #[serde(
        default = "default_query_timeout",
        deserialize_with = "validate_query_timeout"
    )]
    pub query_timeout: Duration,
    #[serde(default, deserialize_with = "validate_connect_timeout")]
    pub connect_timeout: Option<Duration>,
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

fn validate_query_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let timeout: Duration = humantime_serde::deserialize(deserializer)?;
    check_timeout("query_timeout", timeout).map_err(D::Error::custom)?;
    Ok(timeout)
}

fn validate_connect_timeout<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let timeout: Option<Duration> = humantime_serde::deserialize(deserializer)?;
    if let Some(timeout) = timeout {
        check_timeout("connect_timeout", timeout).map_err(D::Error::custom)?;
    }
    Ok(timeout)
}

pub fn check_timeout(name: &str, timeout: Duration) -> Result<(), String> {
    if timeout.is_zero() {
        return Err(format!("{name} must be greater than 0"));
    }
    if timeout > MAX_TIMEOUT {
        return Err(format!("{name} must be at most {MAX_TIMEOUT:?}"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Config {
    config: ConfigTree,
}

impl Config {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let environment =
            std::env::var(format!("{ENVIRONMENT_PREFIX}{CONFIG_SEPARATOR}ENVIRONMENT"))
                .unwrap_or_else(|_| "development".into());

        let config_dir = config_dir.as_ref();
        let default_config = config_dir.join("settings.yml");
        let env_config = config_dir.join(format!("settings.{}.yml", environment));
        let local_config = config_dir.join("settings.local.yml");

        let config = ConfigTree::builder()
            .add_source(File::from(default_config))
            .add_source(File::from(env_config).required(false))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix(ENVIRONMENT_PREFIX)
                    .separator(CONFIG_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(Config { config })
    }

    pub fn get_settings(&self) -> Result<BridgeSettings, ConfigError> {
        let settings: BridgeSettings = self.config.get("bridge")?;
        tracing::debug!(
            "Bridge config: local_addr={}, query_timeout={:?}, connect_timeout={:?}",
            settings.local_addr,
            settings.query_timeout,
            settings.connect_timeout,
        );
        Ok(settings)
    }
}
