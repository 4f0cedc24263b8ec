//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Every variable has a default
//! except `DATABASE_URL`, whose absence selects the in-memory store, and the
//! optional bootstrap administrator.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use thiserror::Error;

use gatehouse_auth::{InvalidationPolicy, PasswordHashConfig, TokenConfig};

pub const BIND_ADDR: &str = "GATEHOUSE_BIND_ADDR";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const SESSION_DURATION_MINUTES: &str = "SESSION_DURATION_MINUTES";
pub const TOKEN_INVALIDATION_ATTEMPTS: &str = "TOKEN_INVALIDATION_ATTEMPTS";
pub const TOKEN_INVALIDATION_BACKOFF_MS: &str = "TOKEN_INVALIDATION_BACKOFF_MS";
pub const PASSWORD_HASH_MEMORY_KIB: &str = "PASSWORD_HASH_MEMORY_KIB";
pub const PASSWORD_HASH_ITERATIONS: &str = "PASSWORD_HASH_ITERATIONS";
pub const PASSWORD_HASH_PARALLELISM: &str = "PASSWORD_HASH_PARALLELISM";
pub const SEED_CATALOG: &str = "SEED_CATALOG";
pub const TOKEN_PURGE_INTERVAL_SECS: &str = "TOKEN_PURGE_INTERVAL_SECS";
pub const SEED_ADMIN_EMAIL: &str = "SEED_ADMIN_EMAIL";
pub const SEED_ADMIN_PASSWORD: &str = "SEED_ADMIN_PASSWORD";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Credentials of the administrator created at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub email: String,
    password: String,
}

impl AdminSeed {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl core::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub tokens: TokenConfig,
    pub invalidation: InvalidationPolicy,
    pub password_hash: PasswordHashConfig,
    pub seed_catalog: bool,
    /// Administrator to ensure at startup; both variables or neither.
    pub admin: Option<AdminSeed>,
    pub purge_interval: StdDuration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get(BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::invalid(BIND_ADDR, &bind_raw, e.to_string()))?;

        let minutes: i64 = parse_or(&get, SESSION_DURATION_MINUTES, 600)?;
        let tokens = TokenConfig::from_minutes(minutes).map_err(|e| {
            ConfigError::invalid(SESSION_DURATION_MINUTES, &minutes.to_string(), e.to_string())
        })?;

        let attempts: u32 = parse_or(&get, TOKEN_INVALIDATION_ATTEMPTS, 3)?;
        if attempts == 0 {
            return Err(ConfigError::invalid(
                TOKEN_INVALIDATION_ATTEMPTS,
                "0",
                "must be at least 1",
            ));
        }
        let backoff_ms: u64 = parse_or(&get, TOKEN_INVALIDATION_BACKOFF_MS, 50)?;

        let defaults = PasswordHashConfig::default();
        let password_hash = PasswordHashConfig {
            memory_kib: parse_or(&get, PASSWORD_HASH_MEMORY_KIB, defaults.memory_kib)?,
            iterations: parse_or(&get, PASSWORD_HASH_ITERATIONS, defaults.iterations)?,
            parallelism: parse_or(&get, PASSWORD_HASH_PARALLELISM, defaults.parallelism)?,
        };

        let seed_catalog = match get(SEED_CATALOG) {
            None => true,
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid(SEED_CATALOG, &raw, "expected true/false"))?,
        };

        let admin = match (get(SEED_ADMIN_EMAIL), get(SEED_ADMIN_PASSWORD)) {
            (None, None) => None,
            (Some(email), Some(password)) => Some(AdminSeed::new(email.trim(), password)),
            (Some(_), None) => {
                return Err(ConfigError::invalid(
                    SEED_ADMIN_PASSWORD,
                    "",
                    format!("required when {SEED_ADMIN_EMAIL} is set"),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::invalid(
                    SEED_ADMIN_EMAIL,
                    "",
                    format!("required when {SEED_ADMIN_PASSWORD} is set"),
                ));
            }
        };

        let purge_secs: u64 = parse_or(&get, TOKEN_PURGE_INTERVAL_SECS, 300)?;
        if purge_secs == 0 {
            return Err(ConfigError::invalid(
                TOKEN_PURGE_INTERVAL_SECS,
                "0",
                "must be positive",
            ));
        }

        Ok(Self {
            bind_addr,
            database_url: get(DATABASE_URL),
            tokens,
            invalidation: InvalidationPolicy {
                attempts,
                backoff: StdDuration::from_millis(backoff_ms),
            },
            password_hash,
            seed_catalog,
            admin,
            purge_interval: StdDuration::from_secs(purge_secs),
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
