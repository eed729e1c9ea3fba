//! Registration validation and password hashing
//!
//! Passwords are hashed with Argon2id into PHC strings (salt and parameters
//! embedded), so verification needs nothing but the stored hash.

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::{FieldError, NewUser};

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 12;

/// Maximum first name length
pub const MAX_FIRST_NAME_LEN: usize = 50;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\w-]+(\.[\w-]+)*@([\w-]+\.)+[a-zA-Z]{2,7}$").expect("valid email regex")
    })
}

fn first_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z\-' ]+$").expect("valid first name regex"))
}

/// Normalize an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate a registration request.
///
/// Returns the normalized user (trimmed name, lower-cased email) or every
/// failing field at once.
pub fn validate_new_user(input: &NewUser) -> Result<NewUser> {
    let mut errors = Vec::new();

    let first_name = input.first_name.trim().to_string();
    if first_name.is_empty() {
        errors.push(FieldError::new("firstName", "First name is required"));
    } else if first_name.chars().count() > MAX_FIRST_NAME_LEN {
        errors.push(FieldError::new(
            "firstName",
            "First name cannot exceed 50 characters",
        ));
    } else if !first_name_regex().is_match(&first_name) {
        errors.push(FieldError::new(
            "firstName",
            "Invalid characters in first name",
        ));
    }

    let email = normalize_email(&input.email);
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !email_regex().is_match(&email) {
        errors.push(FieldError::new("email", "Invalid email format"));
    }

    if input.password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if input.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 12 characters",
        ));
    }

    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    Ok(NewUser {
        first_name,
        email,
        password: input.password.clone(),
    })
}

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::PasswordHash(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| Error::PasswordHash(format!("Stored hash is malformed: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn dummy_hash() -> Option<&'static str> {
    static HASH: OnceLock<Option<String>> = OnceLock::new();
    HASH.get_or_init(|| hash_password("subscout-unknown-account").ok())
        .as_deref()
}

/// Burn the same Argon2 work as a real check for an email with no account,
/// so unknown and known accounts answer in similar time. Always `false`.
pub fn verify_password_unknown_account(password: &str) -> bool {
    if let Some(hash) = dummy_hash() {
        let _ = verify_password(password, hash);
    }
    false
}
