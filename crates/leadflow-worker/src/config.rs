//! Environment configuration of the worker binary.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use leadflow_core::task::DEFAULT_MAX_ATTEMPTS;

use crate::error::AppError;

/// Database used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://leadflow.db?mode=rwc";

/// Offline conversion endpoint used when `AD_PLATFORM_ENDPOINT` is unset.
pub const DEFAULT_AD_PLATFORM_ENDPOINT: &str = "https://api.direct.yandex.ru/live/v4/json/";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// SQLite connection URL.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Retry ceiling of newly pushed tasks.
    pub max_attempts: u32,
    /// Total timeout of each outbound HTTP request.
    pub http_timeout: Duration,
    /// Offline conversion endpoint of the ad platform.
    pub ad_platform_endpoint: String,
    /// Ad-platform token per campaign id.
    pub ad_platform_campaigns: HashMap<String, String>,
    /// Name used in worker logs.
    pub worker_name: String,
}

impl WorkerSettings {
    /// Reads the settings from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the settings through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let max_attempts: u32 = parse_or(&var, "TASK_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(AppError::invalid("TASK_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        let poll_secs: u64 = parse_or(&var, "WORKER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(AppError::invalid("WORKER_POLL_INTERVAL_SECS", "0", "must be at least 1"));
        }
        let timeout_secs: u64 = parse_or(&var, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(AppError::invalid("HTTP_TIMEOUT_SECS", "0", "must be at least 1"));
        }
        let max_connections: u32 =
            parse_or(&var, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(AppError::invalid("DATABASE_MAX_CONNECTIONS", "0", "must be at least 1"));
        }

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            max_connections,
            poll_interval: Duration::from_secs(poll_secs),
            max_attempts,
            http_timeout: Duration::from_secs(timeout_secs),
            ad_platform_endpoint: var("AD_PLATFORM_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_AD_PLATFORM_ENDPOINT.to_owned()),
            ad_platform_campaigns: var("AD_PLATFORM_CAMPAIGNS")
                .map(|raw| parse_campaigns(&raw))
                .transpose()?
                .unwrap_or_default(),
            worker_name: var("WORKER_NAME").unwrap_or_else(|| "leadflow-worker".to_owned()),
        })
    }
}

fn parse_or<T>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| AppError::invalid(key, &raw, err)),
    }
}

/// Parses `campaign_id=token` pairs separated by commas.
fn parse_campaigns(raw: &str) -> Result<HashMap<String, String>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (campaign_id, token) = entry
                .split_once('=')
                .map(|(id, token)| (id.trim(), token.trim()))
                .filter(|(id, token)| !id.is_empty() && !token.is_empty())
                .ok_or_else(|| {
                    AppError::invalid("AD_PLATFORM_CAMPAIGNS", entry, "expected campaign_id=token")
                })?;
            Ok((campaign_id.to_owned(), token.to_owned()))
        })
        .collect()
}
