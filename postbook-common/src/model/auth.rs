use argon2::{
    Argon2,
    password_hash::{self, PasswordHasher, PasswordVerifier, SaltString},
};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

const PASSWORD_SALT_LEN: usize = 16;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing password failed: {0}")]
pub struct PasswordHashError(password_hash::Error);

/// An Argon2id hash of a user password in PHC string format, salt included.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct HashedPassword(String);

impl HashedPassword {
    pub fn generate(password: &str) -> Result<Self, PasswordHashError> {
        let salt: [u8; PASSWORD_SALT_LEN] = rand::random();
        let salt = SaltString::encode_b64(&salt).map_err(PasswordHashError)?;

        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(PasswordHashError)?;

        Ok(Self(hash.to_string()))
    }

    /// Wraps a PHC string read back from storage. Validity is only checked on
    /// [`HashedPassword::verify`].
    #[must_use]
    pub fn from_phc_string(phc: String) -> Self {
        Self(phc)
    }

    pub fn verify(&self, password: &str) -> Result<bool, PasswordHashError> {
        let parsed = password_hash::PasswordHash::new(&self.0).map_err(PasswordHashError)?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(PasswordHashError(err)),
        }
    }

    #[must_use]
    pub fn into_phc_string(self) -> String {
        self.0
    }
}

impl Debug for HashedPassword {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HashedPassword").field(&"[redacted]").finish()
    }
}
