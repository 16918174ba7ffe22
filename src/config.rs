use crate::probes::ProbeTimings;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,
    /// Agent identity. A random one is generated per run when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_report_url")]
    pub report_url: String,
    #[serde(default = "default_report_timeout", with = "duration_str")]
    pub report_timeout: Duration,
    #[serde(default = "default_collect_timeout", with = "duration_str")]
    pub collect_timeout: Duration,
    #[serde(default = "default_cpu_sample_window", with = "duration_str")]
    pub cpu_sample_window: Duration,
    #[serde(default = "default_smbios_timeout", with = "duration_str")]
    pub smbios_timeout: Duration,
    /// Address of the local status endpoint; disabled when absent.
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default = "default_print_snapshot")]
    pub print_snapshot: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            id: None,
            report_url: default_report_url(),
            report_timeout: default_report_timeout(),
            collect_timeout: default_collect_timeout(),
            cpu_sample_window: default_cpu_sample_window(),
            smbios_timeout: default_smbios_timeout(),
            listen: None,
            print_snapshot: default_print_snapshot(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Validation(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.report_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "report_timeout must be greater than zero".to_string(),
            ));
        }

        let url = Url::parse(self.report_url.trim()).map_err(|err| {
            ConfigError::Validation(format!("report_url '{}' is not a valid URL: {err}", self.report_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "report_url '{}' must use http or https",
                self.report_url
            )));
        }

        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(
                    "listen must be a valid host:port address".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn probe_timings(&self) -> ProbeTimings {
        ProbeTimings {
            collect_timeout: self.collect_timeout,
            cpu_sample_window: self.cpu_sample_window,
            smbios_timeout: self.smbios_timeout,
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

const fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_report_url() -> String {
    "http://127.0.0.1:3000/report".to_string()
}

const fn default_report_timeout() -> Duration {
    Duration::from_secs(3)
}

const fn default_collect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_cpu_sample_window() -> Duration {
    Duration::from_millis(500)
}

const fn default_smbios_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_print_snapshot() -> bool {
    true
}
