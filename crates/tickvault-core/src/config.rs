//! Runtime configuration resolved from the environment.
//!
//! | Setting | Env | Default |
//! |---------|-----|---------|
//! | home directory | `TICKVAULT_HOME` | `$HOME/.tickvault` |
//! | Polygon key | `TICKVAULT_POLYGON_API_KEY`, `POLYGON_API_KEY` | none |
//! | Yahoo enabled | `TICKVAULT_YAHOO_ENABLED` | `true` |
//! | partition key | `TICKVAULT_PARTITION_KEY` (base64, 32 bytes) | none |
//! | encryption policy | `TICKVAULT_ENCRYPT` | `options` with a key, else `none` |
//! | empty result policy | `TICKVAULT_EMPTY_RESULT` | `empty` |
//! | unhealthy threshold | `TICKVAULT_UNHEALTHY_AFTER` | 3 |

use std::path::PathBuf;
use std::str::FromStr;

use tickvault_warehouse::{EncryptionKey, EncryptionPolicy, WarehouseConfig};

use crate::CoreError;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

/// How a valid request with no matching rows is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyResultPolicy {
    /// `ok: true` with an empty collection.
    #[default]
    Empty,
    /// `ok: false` with `DATA_NOT_FOUND`.
    NotFound,
}

impl FromStr for EmptyResultPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "empty" | "ok" => Ok(Self::Empty),
            "not-found" | "not_found" | "notfound" => Ok(Self::NotFound),
            other => Err(format!(
                "unknown empty result policy '{other}' (expected empty or not-found)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickvaultConfig {
    pub home: Option<PathBuf>,
    pub polygon_api_key: Option<String>,
    pub yahoo_enabled: bool,
    pub partition_key: Option<EncryptionKey>,
    pub encryption: EncryptionPolicy,
    pub empty_result: EmptyResultPolicy,
    pub unhealthy_after: u32,
    pub default_timeout_ms: u64,
}

impl Default for TickvaultConfig {
    fn default() -> Self {
        Self {
            home: None,
            polygon_api_key: None,
            yahoo_enabled: true,
            partition_key: None,
            encryption: EncryptionPolicy::None,
            empty_result: EmptyResultPolicy::Empty,
            unhealthy_after: DEFAULT_UNHEALTHY_AFTER,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl TickvaultConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let partition_key = get("TICKVAULT_PARTITION_KEY")
            .map(|encoded| EncryptionKey::from_base64(&encoded))
            .transpose()
            .map_err(|error| CoreError::Config(format!("TICKVAULT_PARTITION_KEY: {error}")))?;

        let encryption = match get("TICKVAULT_ENCRYPT") {
            Some(value) => value
                .parse::<EncryptionPolicy>()
                .map_err(|error| CoreError::Config(format!("TICKVAULT_ENCRYPT: {error}")))?,
            None if partition_key.is_some() => EncryptionPolicy::Options,
            None => EncryptionPolicy::None,
        };
        if encryption != EncryptionPolicy::None && partition_key.is_none() {
            return Err(CoreError::Config(String::from(
                "TICKVAULT_ENCRYPT requires TICKVAULT_PARTITION_KEY",
            )));
        }

        let empty_result = get("TICKVAULT_EMPTY_RESULT")
            .map(|value| value.parse::<EmptyResultPolicy>())
            .transpose()
            .map_err(|error| CoreError::Config(format!("TICKVAULT_EMPTY_RESULT: {error}")))?
            .unwrap_or_default();

        let unhealthy_after = get("TICKVAULT_UNHEALTHY_AFTER")
            .map(|value| {
                value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|threshold| *threshold > 0)
                    .ok_or_else(|| {
                        CoreError::Config(format!(
                            "TICKVAULT_UNHEALTHY_AFTER: expected a positive integer, got '{value}'"
                        ))
                    })
            })
            .transpose()?
            .unwrap_or(DEFAULT_UNHEALTHY_AFTER);

        let yahoo_enabled = get("TICKVAULT_YAHOO_ENABLED")
            .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Ok(Self {
            home: get("TICKVAULT_HOME").map(PathBuf::from),
            polygon_api_key: get("TICKVAULT_POLYGON_API_KEY").or_else(|| get("POLYGON_API_KEY")),
            yahoo_enabled,
            partition_key,
            encryption,
            empty_result,
            unhealthy_after,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        })
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        let mut config = match &self.home {
            Some(home) => WarehouseConfig::at(home),
            None => WarehouseConfig::default(),
        };
        config.encryption_key = self.partition_key.clone();
        config.encryption = self.encryption;
        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<TickvaultConfig, CoreError> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        TickvaultConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).expect("config");
        assert!(config.yahoo_enabled);
        assert!(config.polygon_api_key.is_none());
        assert_eq!(config.encryption, EncryptionPolicy::None);
        assert_eq!(config.empty_result, EmptyResultPolicy::Empty);
        assert_eq!(config.unhealthy_after, 3);
        assert_eq!(config.default_timeout_ms, 5_000);
    }

    #[test]
    fn partition_key_enables_options_encryption() {
        let key = EncryptionKey::generate_base64();
        let config = config(&[("TICKVAULT_PARTITION_KEY", key.as_str())]).expect("config");
        assert_eq!(config.encryption, EncryptionPolicy::Options);
        assert!(config.warehouse_config().encryption_key.is_some());
    }

    #[test]
    fn encryption_without_key_is_rejected() {
        let error = config(&[("TICKVAULT_ENCRYPT", "all")]).expect_err("must fail");
        assert!(matches!(error, CoreError::Config(_)));
    }

    #[test]
    fn polygon_key_falls_back_to_unprefixed_variable() {
        let config = config(&[("POLYGON_API_KEY", "abc"), ("TICKVAULT_YAHOO_ENABLED", "false")])
            .expect("config");
        assert_eq!(config.polygon_api_key.as_deref(), Some("abc"));
        assert!(!config.yahoo_enabled);
    }

    #[test]
    fn empty_result_policy_parses() {
        let config = config(&[("TICKVAULT_EMPTY_RESULT", "not-found")]).expect("config");
        assert_eq!(config.empty_result, EmptyResultPolicy::NotFound);
        assert!(matches!(
            super::TickvaultConfig::from_lookup(|name| (name == "TICKVAULT_UNHEALTHY_AFTER")
                .then(|| String::from("zero"))),
            Err(CoreError::Config(_))
        ));
    }
}
