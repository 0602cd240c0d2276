use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::jwt::AuthError;

/// Compute an Argon2id password hash.
///
/// # Errors
/// Returns [`AuthError::PasswordHash`] if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::PasswordHash(err.to_string()))
}

/// Verify a password against an encoded Argon2id hash.
///
/// # Errors
/// Returns [`AuthError::InvalidCredentials`] on mismatch and [`AuthError::PasswordHash`]
/// when the stored hash cannot be parsed.
pub fn verify_password(hash: &str, candidate: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|err| AuthError::PasswordHash(err.to_string()))?;
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)
}
