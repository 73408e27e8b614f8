//! Store configuration resolved from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const ENV_SUPABASE_URL: &str = "SPRIG_SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "SPRIG_SUPABASE_ANON_KEY";
const ENV_POLL_INTERVAL_MS: &str = "SPRIG_POLL_INTERVAL_MS";
const ENV_STORAGE_BUCKET: &str = "SPRIG_STORAGE_BUCKET";

/// Default change-poll interval for the remote store's watchers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default object-storage bucket for profile images and link icons.
pub const DEFAULT_STORAGE_BUCKET: &str = "images";

/// Connection settings for the remote store and its object storage.
///
/// The anon key is a safe-to-ship public API key, not a secret credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Supabase project base URL
    pub url: String,
    /// Supabase anon/public API key
    pub anon_key: String,
    /// Interval between change polls
    pub poll_interval: Duration,
    /// Bucket holding uploaded images
    pub storage_bucket: String,
}

impl StoreConfig {
    /// Build a config with default poll interval and bucket.
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(Error::InvalidInput(
                "Supabase URL must not be empty".to_string(),
            ));
        }
        if !is_http_url(&url) {
            return Err(Error::InvalidInput(
                "Supabase URL must include http:// or https://".to_string(),
            ));
        }

        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(Error::InvalidInput(
                "Supabase anon key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            url,
            anon_key,
            poll_interval: DEFAULT_POLL_INTERVAL,
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
        })
    }

    /// Load configuration from `SPRIG_*` environment variables.
    ///
    /// Returns `Ok(None)` when no store variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }
}

fn parse_config(get: impl Fn(&str) -> Option<String>) -> Result<Option<StoreConfig>> {
    let url = normalize_text_option(get(ENV_SUPABASE_URL));
    let anon_key = normalize_text_option(get(ENV_SUPABASE_ANON_KEY));

    let (url, anon_key) = match (url, anon_key) {
        (None, None) => return Ok(None),
        (Some(url), Some(anon_key)) => (url, anon_key),
        _ => {
            return Err(Error::InvalidInput(format!(
                "set both {ENV_SUPABASE_URL} and {ENV_SUPABASE_ANON_KEY}, or neither"
            )))
        }
    };

    let mut config = StoreConfig::new(url, anon_key)?;

    if let Some(raw) = normalize_text_option(get(ENV_POLL_INTERVAL_MS)) {
        let millis: u64 = raw.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "{ENV_POLL_INTERVAL_MS} must be a positive integer, got '{raw}'"
            ))
        })?;
        if millis == 0 {
            return Err(Error::InvalidInput(format!(
                "{ENV_POLL_INTERVAL_MS} must not be zero"
            )));
        }
        config.poll_interval = Duration::from_millis(millis);
    }

    if let Some(bucket) = normalize_text_option(get(ENV_STORAGE_BUCKET)) {
        config.storage_bucket = bucket;
    }

    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn absent_configuration_is_none() {
        assert_eq!(parse_config(|_| None).unwrap(), None);
    }

    #[test]
    fn partial_configuration_is_an_error() {
        let result = parse_config(env_with(&[(ENV_SUPABASE_URL, "https://demo.supabase.co")]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn full_configuration_applies_defaults() {
        let config = parse_config(env_with(&[
            (ENV_SUPABASE_URL, "https://demo.supabase.co/"),
            (ENV_SUPABASE_ANON_KEY, " anon "),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.url, "https://demo.supabase.co");
        assert_eq!(config.anon_key, "anon");
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.storage_bucket, DEFAULT_STORAGE_BUCKET);
    }

    #[test]
    fn poll_interval_and_bucket_overrides() {
        let config = parse_config(env_with(&[
            (ENV_SUPABASE_URL, "https://demo.supabase.co"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_STORAGE_BUCKET, "avatars"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.storage_bucket, "avatars");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let result = parse_config(env_with(&[
            (ENV_SUPABASE_URL, "https://demo.supabase.co"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_POLL_INTERVAL_MS, "0"),
        ]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn non_http_url_is_rejected() {
        assert!(StoreConfig::new("demo.supabase.co", "anon").is_err());
        assert!(StoreConfig::new("   ", "anon").is_err());
        assert!(StoreConfig::new("https://demo.supabase.co", "  ").is_err());
    }
}
