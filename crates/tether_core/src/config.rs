//! Core configuration.
//!
//! # Responsibility
//! - Hold the settings relationship and resource services depend on.
//! - Load them from JSON or from `TETHER_*` environment variables.
//!
//! # Invariants
//! - `host_name` is non-empty, whitespace-free and has no trailing slash.
//! - `page_size`, when set, is within `1..=MAX_PAGE_SIZE`.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_HOST_NAME: &str = "http://localhost:8080";
pub const MAX_PAGE_SIZE: u32 = 100;

const ENV_HOST_NAME: &str = "TETHER_HOST_NAME";
const ENV_CONSISTENCY: &str = "TETHER_CONSISTENCY";
const ENV_PAGE_SIZE: &str = "TETHER_PAGE_SIZE";

/// Write policy for multi-record link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Every write is attempted independently; partial completion is possible.
    #[default]
    BestEffort,
    /// Writes run in one store transaction and roll back on first failure.
    AllOrNothing,
}

impl ConsistencyMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Some(Self::BestEffort),
            "all_or_nothing" | "all-or-nothing" | "atomic" => Some(Self::AllOrNothing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestEffort => "best_effort",
            Self::AllOrNothing => "all_or_nothing",
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A setting holds an unusable value.
    InvalidValue { key: &'static str, value: String },
    /// JSON document could not be parsed.
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Settings shared by core services.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL for derived `self` links.
    pub host_name: String,
    pub consistency: ConsistencyMode,
    /// Overrides each kind's default page size.
    pub page_size: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host_name: DEFAULT_HOST_NAME.to_string(),
            consistency: ConsistencyMode::default(),
            page_size: None,
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.normalized()
    }

    /// Reads `TETHER_HOST_NAME`, `TETHER_CONSISTENCY` and `TETHER_PAGE_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host_name) = lookup(ENV_HOST_NAME) {
            config.host_name = host_name;
        }
        if let Some(value) = lookup(ENV_CONSISTENCY) {
            config.consistency =
                ConsistencyMode::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_CONSISTENCY,
                    value,
                })?;
        }
        if let Some(value) = lookup(ENV_PAGE_SIZE) {
            let page_size = value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_PAGE_SIZE,
                    value: value.clone(),
                })?;
            config.page_size = Some(page_size);
        }
        config.normalized()
    }

    fn normalized(mut self) -> Result<Self, ConfigError> {
        let host_name = self.host_name.trim().trim_end_matches('/').to_string();
        if host_name.is_empty() || host_name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: ENV_HOST_NAME,
                value: self.host_name,
            });
        }
        self.host_name = host_name;

        if let Some(page_size) = self.page_size {
            if page_size == 0 || page_size > MAX_PAGE_SIZE {
                return Err(ConfigError::InvalidValue {
                    key: ENV_PAGE_SIZE,
                    value: page_size.to_string(),
                });
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ConsistencyMode, CoreConfig, DEFAULT_HOST_NAME};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.host_name, DEFAULT_HOST_NAME);
        assert_eq!(config.consistency, ConsistencyMode::BestEffort);
    }

    #[test]
    fn lookup_overrides_are_normalized() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("TETHER_HOST_NAME", " https://api.example.com/ "),
            ("TETHER_CONSISTENCY", "All-Or-Nothing"),
            ("TETHER_PAGE_SIZE", "25"),
        ]))
        .unwrap();
        assert_eq!(config.host_name, "https://api.example.com");
        assert_eq!(config.consistency, ConsistencyMode::AllOrNothing);
        assert_eq!(config.page_size, Some(25));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = CoreConfig::from_lookup(lookup(&[("TETHER_CONSISTENCY", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "TETHER_CONSISTENCY", .. }));

        assert!(CoreConfig::from_lookup(lookup(&[("TETHER_PAGE_SIZE", "0")])).is_err());
        assert!(CoreConfig::from_lookup(lookup(&[("TETHER_PAGE_SIZE", "ten")])).is_err());
        assert!(CoreConfig::from_lookup(lookup(&[("TETHER_HOST_NAME", "a b")])).is_err());
    }

    #[test]
    fn json_document_keeps_defaults_for_missing_keys() {
        let config = CoreConfig::from_json_str(r#"{"consistency": "all_or_nothing"}"#).unwrap();
        assert_eq!(config.consistency, ConsistencyMode::AllOrNothing);
        assert_eq!(config.host_name, DEFAULT_HOST_NAME);

        let err = CoreConfig::from_json_str(r#"{"consistency": "maybe"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
