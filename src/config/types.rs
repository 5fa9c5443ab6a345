use crate::subscription::Filter;
use crate::window::TimeSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub time: TimeSpec,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Load trace contexts and registered user names.
    #[serde(default)]
    pub admin: bool,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(with = "duration_format", default = "default_load")]
    pub load: Duration,
    #[serde(with = "duration_format", default = "default_auxiliary")]
    pub auxiliary: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            load: default_load(),
            auxiliary: default_auxiliary(),
        }
    }
}

fn default_load() -> Duration {
    Duration::from_secs(1)
}

fn default_auxiliary() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON-lines event file.
    pub path: PathBuf,
    #[serde(with = "duration_format", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_batch_buffer")]
    pub batch_buffer: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persons: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traces: Option<PathBuf>,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_batch_buffer() -> usize {
    1000
}

// Custom serde module for duration parsing
mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Ok(duration)
    }

    pub(super) fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}
