//! Password hashing, isolated so the algorithm can be swapped without
//! touching the session flow.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password into a PHC string that embeds its own salt and cost
/// parameters, safe to store directly.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// A malformed stored hash is "does not match", never an error, so the caller
/// cannot distinguish a missing hash from a bad one.
pub(crate) fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips() -> Result<()> {
        let hash = hash_password("CorrectHorseBatteryStaple")?;
        assert!(verify_password("CorrectHorseBatteryStaple", &hash));
        Ok(())
    }

    #[test]
    fn wrong_password_does_not_verify() -> Result<()> {
        let hash = hash_password("CorrectHorseBatteryStaple")?;
        assert!(!verify_password("Tr0ub4dor&3", &hash));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        let first = hash_password("password")?;
        let second = hash_password("password")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_false_not_error() {
        assert!(!verify_password("password", ""));
        assert!(!verify_password("password", "not-a-phc-string"));
        assert!(!verify_password("password", "$argon2id$v=19$truncated"));
    }
}
