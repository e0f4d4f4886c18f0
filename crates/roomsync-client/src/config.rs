//! Environment-backed runtime configuration for the store client.

use std::{env, time::Duration};

use roomsync_core::{GlobalStore, MAX_PAGINATE_LIMIT};
use thiserror::Error;
use url::Url;

const DEFAULT_MEDIA_BASE_URL: &str = "http://localhost:29325/";
const DEFAULT_PAGINATE_LIMIT: u16 = 50;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Runtime configuration for the store and request façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL that media paths are resolved against.
    pub media_base_url: Url,
    /// Rows requested per `paginate` call.
    pub paginate_limit: u16,
    /// Upper bound for one outbound request, after which its guard is released.
    pub request_timeout: Duration,
    /// Capacity of the push frame queue and the change broadcast.
    pub event_buffer: usize,
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let media_base_url = parse_base_url(
            "ROOMSYNC_MEDIA_BASE_URL",
            optional_trimmed_env("ROOMSYNC_MEDIA_BASE_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_MEDIA_BASE_URL.to_owned()),
        )?;
        let paginate_limit = parse_with_default(
            "ROOMSYNC_PAGINATE_LIMIT",
            DEFAULT_PAGINATE_LIMIT,
            &mut lookup,
        )?;
        let request_timeout_ms = parse_with_default(
            "ROOMSYNC_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let event_buffer =
            parse_with_default("ROOMSYNC_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if paginate_limit == 0 || paginate_limit > MAX_PAGINATE_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "ROOMSYNC_PAGINATE_LIMIT",
                value: paginate_limit.to_string(),
                reason: format!("must be between 1 and {MAX_PAGINATE_LIMIT}"),
            });
        }
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMSYNC_REQUEST_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMSYNC_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            media_base_url,
            paginate_limit,
            request_timeout: Duration::from_millis(request_timeout_ms),
            event_buffer,
        })
    }

    /// Empty store sized by this configuration.
    pub fn build_store(&self) -> GlobalStore {
        GlobalStore::new(self.paginate_limit, self.event_buffer)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        reason: err.to_string(),
        value,
    })
}

fn parse_base_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    let url = Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.clone(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be an http(s) base url".to_owned(),
        });
    }
    Ok(url)
}
