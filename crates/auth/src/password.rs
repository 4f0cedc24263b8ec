//! Password hashing primitive.

use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::AuthError;

/// Hash and verify passwords. Implementations must produce self-describing
/// hashes (salt and parameters embedded).
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// `Ok(false)` on mismatch; `Err` only when `hash` is unreadable or the
    /// primitive fails.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError>;

    /// Burn one verification's worth of work without a real hash, so that
    /// unknown identifiers cost as much as wrong passwords.
    fn verify_dummy(&self, password: &str);
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PasswordHashConfig {
    /// Cheapest parameters argon2 accepts. Tests only.
    pub const fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Argon2id, PHC string output.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy: OnceLock<String>,
}

impl Argon2Hasher {
    pub fn new(config: PasswordHashConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: OnceLock::new(),
        })
    }
}

impl core::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Argon2Hasher").finish_non_exhaustive()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let salt =
            SaltString::encode_b64(&bytes).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::PasswordHash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::PasswordHash(e.to_string())),
        }
    }

    fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy
            .get_or_init(|| self.hash("gatehouse-dummy-password").unwrap_or_default());
        if let Err(e) = self.verify(password, dummy) {
            tracing::debug!(error = %e, "dummy password verification failed");
        }
    }
}
