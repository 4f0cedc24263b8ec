use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{TokenId, UserId};

/// Number of random bytes behind every bearer secret (256 bits).
pub const SECRET_BYTES: usize = 32;

/// Default sliding session window.
pub const DEFAULT_TTL_MINUTES: i64 = 600;

/// Longest sliding session window accepted (one year).
pub const MAX_TTL_MINUTES: i64 = 366 * 24 * 60;

/// Opaque bearer value.
///
/// `Debug` is redacted so secrets never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Draw a fresh secret from the OS CSPRNG, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("TokenSecret(***)")
    }
}

/// Access token row.
///
/// # Invariants
/// - `expires_at > created_at` at creation.
/// - `expires_at` never moves backwards across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: TokenId,
    pub secret: TokenSecret,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Mint a new token for `user_id`, valid for `ttl` from `now`.
    pub fn mint(user_id: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: TokenId::new(),
            secret: TokenSecret::generate(),
            user_id,
            created_at: now,
            expires_at: saturating_add(now, ttl),
        }
    }

    /// The sentinel token paired with the anonymous user.
    pub fn anonymous() -> Self {
        Self {
            id: TokenId::nil(),
            secret: TokenSecret::new(""),
            user_id: UserId::nil(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil()
    }

    /// A token is expired once `expires_at` lies strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Slide the expiry to `now + ttl`.
    ///
    /// The window restarts from `now` instead of accumulating, and the result
    /// is clamped so the expiry never regresses.
    pub fn refresh(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = self.expires_at.max(saturating_add(now, ttl));
    }
}

fn saturating_add(instant: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenConfigError {
    #[error("token ttl must be positive, got {0} minutes")]
    NonPositiveTtl(i64),

    #[error("token ttl must be at most {MAX_TTL_MINUTES} minutes, got {0}")]
    TtlTooLong(i64),
}

/// Token lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    ttl: Duration,
}

impl TokenConfig {
    pub fn new(ttl: Duration) -> Result<Self, TokenConfigError> {
        if ttl <= Duration::zero() {
            return Err(TokenConfigError::NonPositiveTtl(ttl.num_minutes()));
        }
        if ttl > Duration::minutes(MAX_TTL_MINUTES) {
            return Err(TokenConfigError::TtlTooLong(ttl.num_minutes()));
        }
        Ok(Self { ttl })
    }

    pub fn from_minutes(minutes: i64) -> Result<Self, TokenConfigError> {
        if minutes <= 0 {
            return Err(TokenConfigError::NonPositiveTtl(minutes));
        }
        let ttl = Duration::try_minutes(minutes).ok_or(TokenConfigError::TtlTooLong(minutes))?;
        Self::new(ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn generated_secrets_are_64_hex_chars_and_distinct() {
        let a = TokenSecret::generate();
        let b = TokenSecret::generate();
        assert_eq!(a.as_str().len(), SECRET_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = TokenSecret::new("super-secret");
        assert!(!format!("{secret:?}").contains("super-secret"));
    }

    #[test]
    fn minted_token_expires_after_creation() {
        let token = AccessToken::mint(UserId::new(), t0(), Duration::hours(10));
        assert!(token.expires_at > token.created_at);
        assert_eq!(token.expires_at, t0() + Duration::hours(10));
    }

    #[test]
    fn expiry_is_strict() {
        let token = AccessToken::mint(UserId::new(), t0(), Duration::hours(1));
        assert!(!token.is_expired(t0() + Duration::hours(1)));
        assert!(token.is_expired(t0() + Duration::hours(1) + Duration::seconds(1)));
        assert!(token.is_expired(t0() + Duration::days(3650)));
    }

    #[test]
    fn refresh_restarts_window_from_now() {
        let ttl = Duration::hours(10);
        let mut token = AccessToken::mint(UserId::new(), t0(), ttl);
        let now = t0() + Duration::hours(5);

        for _ in 0..5 {
            token.refresh(now, ttl);
        }

        assert_eq!(token.expires_at, t0() + Duration::hours(15));
    }

    #[test]
    fn ttl_is_bounded_above() {
        assert_eq!(
            TokenConfig::from_minutes(i64::MAX),
            Err(TokenConfigError::TtlTooLong(i64::MAX))
        );
        assert_eq!(
            TokenConfig::from_minutes(1_000_000_000_000),
            Err(TokenConfigError::TtlTooLong(1_000_000_000_000))
        );
        assert!(TokenConfig::from_minutes(MAX_TTL_MINUTES).is_ok());
        assert!(TokenConfig::new(Duration::days(400)).is_err());
    }

    #[test]
    fn expiry_saturates_at_the_end_of_time() {
        let late = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let ttl = Duration::minutes(MAX_TTL_MINUTES);

        let mut token = AccessToken::mint(UserId::new(), late, ttl);
        assert_eq!(token.expires_at, DateTime::<Utc>::MAX_UTC);

        token.refresh(late, ttl);
        assert_eq!(token.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn refresh_never_regresses() {
        let ttl = Duration::hours(10);
        let mut token = AccessToken::mint(UserId::new(), t0(), ttl);
        token.refresh(t0() - Duration::hours(1), ttl);
        assert_eq!(token.expires_at, t0() + ttl);
    }

    #[test]
    fn config_rejects_non_positive_ttl() {
        assert!(TokenConfig::from_minutes(0).is_err());
        assert!(TokenConfig::new(Duration::seconds(-5)).is_err());
        assert_eq!(TokenConfig::default().ttl(), Duration::hours(10));
    }
}
