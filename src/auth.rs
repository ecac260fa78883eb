use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use scrypt::password_hash::rand_core::OsRng;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::{Params, Scrypt};

use crate::engine::EngineError;
use crate::limits::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};

/// Cost used when nothing else is configured (scrypt's recommended N = 2^17).
pub const DEFAULT_LOG_N: u8 = 17;

/// Service password checked at connection startup. Account sign-in happens
/// afterwards, in-band, through `LOGIN`.
#[derive(Debug)]
pub struct ServiceAuthSource {
    password: String,
}

impl ServiceAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ServiceAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// scrypt parameters for account passwords, stored in PHC string form.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    log_n: u8,
}

impl PasswordPolicy {
    pub fn new(log_n: u8) -> Self {
        Self { log_n }
    }

    pub fn check_length(password: &str) -> Result<(), EngineError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(EngineError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(EngineError::LimitExceeded("password too long"));
        }
        Ok(())
    }

    pub fn hash(&self, password: &str) -> Result<String, EngineError> {
        Self::check_length(password)?;
        let params = Params::new(self.log_n, 8, 1, Params::RECOMMENDED_LEN)
            .map_err(|e| EngineError::Invalid(format!("scrypt parameters: {e}")))?;
        let salt = SaltString::generate(&mut OsRng);
        Scrypt
            .hash_password_customized(password.as_bytes(), None, None, params, &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| EngineError::Invalid(format!("password hashing failed: {e}")))
    }

    /// `hash` on the blocking pool. scrypt at the default cost holds a core
    /// and 128 MiB for a noticeable while, which must not stall a worker.
    pub async fn hash_blocking(self, password: String) -> Result<String, EngineError> {
        Self::check_length(&password)?;
        tokio::task::spawn_blocking(move || self.hash(&password))
            .await
            .map_err(|e| EngineError::Invalid(format!("password hashing task failed: {e}")))?
    }

    /// Parameters are read back from the stored hash, so a policy change
    /// does not invalidate existing accounts.
    pub fn verify(stored: &str, password: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => Scrypt.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_N)
    }
}
