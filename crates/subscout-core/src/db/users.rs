//! User operations

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{parse_datetime, Database};
use crate::auth::{hash_password, normalize_email, validate_new_user};
use crate::error::{Error, Result};
use crate::models::{NewUser, User};

/// Stored login material, only used to check credentials
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: i64,
    pub password_hash: String,
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let created_at_str: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Validate, hash and insert a new user
    ///
    /// Returns `Error::Validation` for bad input and `Error::Conflict` when
    /// the email is already registered.
    pub fn create_user(&self, input: &NewUser) -> Result<User> {
        let user = validate_new_user(input)?;

        if self.get_user_by_email(&user.email)?.is_some() {
            return Err(Error::Conflict(format!(
                "An account with email {} already exists",
                user.email
            )));
        }

        let password_hash = hash_password(&user.password)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (email, password_hash, first_name) VALUES (?, ?, ?)",
            params![user.email, password_hash, user.first_name],
        )
        .map_err(|e| match e {
            // Lost a race with a concurrent registration
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Conflict(format!(
                    "An account with email {} already exists",
                    user.email
                ))
            }
            other => Error::Database(other),
        })?;
        let id = conn.last_insert_rowid();
        drop(conn);

        info!(user_id = id, "Registered new user");

        self.get_user(id)?
            .ok_or_else(|| Error::NotFound(format!("User {} vanished after insert", id)))
    }

    /// Get a user by ID
    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, first_name, created_at FROM users WHERE id = ?",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Get a user by email (case-insensitive, surrounding whitespace ignored)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, first_name, created_at FROM users WHERE email = ?",
                params![normalize_email(email)],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Get the password hash for a login attempt
    pub fn get_user_credentials(&self, email: &str) -> Result<Option<UserCredentials>> {
        let conn = self.conn()?;
        let creds = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?",
                params![normalize_email(email)],
                |row| {
                    Ok(UserCredentials {
                        user_id: row.get(0)?,
                        password_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(creds)
    }

    /// List all users, oldest first
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, email, first_name, created_at FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }
}
