//! Identity providers.
//!
//! The core defines only the provider interface plus a toy password
//! provider used by tests and the device-code flow demo. Real OIDC or
//! OAuth2 providers are external collaborators.

use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use rand::rngs::OsRng;

use crate::error::SecurityError;

/// An identity provider: maps credentials onto an external identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The provider name identities are scoped to.
    fn provider_name(&self) -> &str;

    /// Authenticate; `Ok(Some(id))` on success, `Ok(None)` on bad
    /// credentials.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, SecurityError>;
}

/// A password provider over a fixed user table with argon2 hashes.
pub struct ToyPasswordProvider {
    name: String,
    /// username -> PHC-format argon2 hash
    users: HashMap<String, String>,
}

impl ToyPasswordProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            users: HashMap::new(),
        }
    }

    /// Add a user, hashing the password now.
    pub fn with_user(
        mut self,
        username: impl Into<String>,
        password: &str,
    ) -> Result<Self, SecurityError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| SecurityError::Configuration(err.to_string()))?;
        self.users.insert(username.into(), hash.to_string());
        Ok(self)
    }
}

#[async_trait]
impl AuthProvider for ToyPasswordProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, SecurityError> {
        let Some(stored) = self.users.get(username) else {
            return Ok(None);
        };
        let parsed = PasswordHash::new(stored)
            .map_err(|err| SecurityError::Configuration(err.to_string()))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Some(username.to_string())),
            Err(argon2::password_hash::Error::Password) => Ok(None),
            Err(err) => Err(SecurityError::Configuration(err.to_string())),
        }
    }
}
