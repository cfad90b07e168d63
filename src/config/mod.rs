use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use humantime::parse_duration;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};
use crate::exporter::LabelFilter;

pub mod defaults;

use defaults::*;

/// Environment variable names understood for compatibility with existing
/// deployments, mapped onto nested configuration keys.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("ESL_IP", "esl.host"),
    ("ESL_PORT", "esl.port"),
    ("ESL_PASSWORD", "esl.password"),
    ("METRICS_HOST", "metrics.host"),
    ("METRICS_PORT", "metrics.port"),
    ("METRICS_PATH", "metrics.path"),
    ("FILTER_LABELS", "metrics.filter_labels"),
    ("DEBUG", "debug"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub esl: EslConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Enables debug-level logging for this crate
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub debug: bool,
}

/// Event Socket connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EslConfig {
    #[serde(default = "default_esl_host")]
    pub host: String,
    #[serde(default = "default_esl_port")]
    pub port: u16,
    #[serde(default = "default_esl_password")]
    pub password: String,
    /// Bound on connect + authenticate + subscribe at startup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Delay between reconnection attempts after the connection drops
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: String,
}

/// Scrape endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
    /// Comma separated label names dropped from every emitted series
    #[serde(default)]
    pub filter_labels: Option<String>,
}

fn default_esl_host() -> String {
    DEFAULT_ESL_HOST.to_string()
}

fn default_esl_port() -> u16 {
    DEFAULT_ESL_PORT
}

fn default_esl_password() -> String {
    DEFAULT_ESL_PASSWORD.to_string()
}

fn default_connect_timeout() -> String {
    DEFAULT_CONNECT_TIMEOUT.to_string()
}

fn default_reconnect_interval() -> String {
    DEFAULT_RECONNECT_INTERVAL.to_string()
}

fn default_metrics_host() -> String {
    DEFAULT_METRICS_HOST.to_string()
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

impl Default for EslConfig {
    fn default() -> Self {
        Self {
            host: default_esl_host(),
            port: default_esl_port(),
            password: default_esl_password(),
            connect_timeout: default_connect_timeout(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
            path: default_metrics_path(),
            filter_labels: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            esl: EslConfig::default(),
            metrics: MetricsConfig::default(),
            debug: false,
        }
    }
}

impl EslConfig {
    pub fn connect_timeout(&self) -> ConfigResult<Duration> {
        parse_field("esl.connect_timeout", &self.connect_timeout)
    }

    pub fn reconnect_interval(&self) -> ConfigResult<Duration> {
        parse_field("esl.reconnect_interval", &self.reconnect_interval)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl MetricsConfig {
    pub fn label_filter(&self) -> LabelFilter {
        self.filter_labels
            .as_deref()
            .map(LabelFilter::parse)
            .unwrap_or_default()
    }
}

fn parse_field(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        field: field.to_string(),
        message: e.to_string(),
    })
}

impl Config {
    /// Layer defaults, an optional TOML file and the environment.
    ///
    /// Later layers win: `FSX_`-prefixed nested keys (`FSX_ESL__HOST`) and
    /// then the flat legacy names (`ESL_IP`, `FILTER_LABELS`, ...).
    pub fn load(config_file: Option<&Path>) -> ConfigResult<Self> {
        Ok(Self::figment(config_file).extract()?)
    }

    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(legacy_env())
    }
}

/// Accept `true`/`false`, `1`/`0`, `yes`/`no` and `on`/`off` for switches
/// that are commonly set from the environment.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean: true/false, 1/0, yes/no or on/off")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<bool, E> {
            match value {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &self)),
            }
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<bool, E> {
            match value {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Signed(value), &self)),
            }
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<bool, E> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" | "" => Ok(false),
                _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
            }
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

fn legacy_env() -> Env {
    Env::raw().filter_map(|key| {
        LEGACY_ENV_KEYS
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.esl.address(), "127.0.0.1:8021");
        assert_eq!(config.esl.password, "ClueCon");
        assert_eq!(config.metrics.port, 8031);
        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.esl.connect_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(config.esl.reconnect_interval().unwrap(), Duration::from_secs(5));
        assert!(config.metrics.label_filter().is_empty());
        assert!(!config.debug);
    }

    #[test]
    fn test_legacy_environment_names() {
        Jail::expect_with(|jail| {
            jail.set_env("ESL_IP", "10.0.0.5");
            jail.set_env("ESL_PORT", "9021");
            jail.set_env("ESL_PASSWORD", "s3cret");
            jail.set_env("METRICS_PATH", "/scrape");
            jail.set_env("FILTER_LABELS", "uuid, dest");
            jail.set_env("DEBUG", "true");

            let config = Config::load(None).expect("config loads");
            assert_eq!(config.esl.host, "10.0.0.5");
            assert_eq!(config.esl.port, 9021);
            assert_eq!(config.esl.password, "s3cret");
            assert_eq!(config.metrics.path, "/scrape");
            assert!(config.debug);

            let filter = config.metrics.label_filter();
            assert!(filter.contains("uuid"));
            assert!(filter.contains("dest"));
            assert!(!filter.contains("callstate"));
            Ok(())
        });
    }

    #[test]
    fn test_debug_flag_spellings() {
        for (raw, expected) in [("1", true), ("0", false), ("yes", true), ("OFF", false), ("false", false)] {
            Jail::expect_with(|jail| {
                jail.set_env("DEBUG", raw);
                let config = Config::load(None).expect("config loads");
                assert_eq!(config.debug, expected, "DEBUG={raw}");
                Ok(())
            });
        }
    }

    #[test]
    fn test_debug_flag_rejects_other_values() {
        Jail::expect_with(|jail| {
            jail.set_env("DEBUG", "2");
            let err = Config::load(None).unwrap_err();
            assert!(err.to_string().contains("1/0"), "{err}");

            jail.set_env("DEBUG", "verbose");
            assert!(Config::load(None).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "exporter.toml",
                r#"
                [esl]
                host = "fs.internal"
                reconnect_interval = "2s"

                [metrics]
                port = 9100
                "#,
            )?;
            jail.set_env("FSX_METRICS__PORT", "9200");

            let config = Config::load(Some(Path::new("exporter.toml"))).expect("config loads");
            assert_eq!(config.esl.host, "fs.internal");
            assert_eq!(config.esl.port, DEFAULT_ESL_PORT);
            assert_eq!(config.esl.reconnect_interval().unwrap(), Duration::from_secs(2));
            assert_eq!(config.metrics.port, 9200);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_duration() {
        let config = EslConfig {
            reconnect_interval: "soon".to_string(),
            ..EslConfig::default()
        };
        assert!(matches!(
            config.reconnect_interval(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
