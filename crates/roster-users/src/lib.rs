//! User records for Roster.
//!
//! Implements listing and creating users on top of the `users` table that
//! the `roster-db` migrations create, plus the input validation the HTTP
//! layer applies before anything reaches the database.

pub mod validation;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use validation::{
    sanitize_input, validate_email, validate_new_user, validate_required,
    validate_string_length, ValidationError,
};

/// Errors that can occur during user operations.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Email already exists")]
    EmailExists(String),
}

/// A stored user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Internal database ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Unique email address.
    pub email: String,
    /// Age in years, if known.
    pub age: Option<i64>,
    /// Account status (`active` unless changed).
    pub status: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last modification timestamp.
    pub updated_at: String,
}

/// Validated input for creating a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: Option<i64>,
}

const USER_COLUMNS: &str = "id, name, email, age, status, created_at, updated_at";

fn map_row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        age: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Lists all users, newest first.
pub fn list_users(conn: &Connection) -> Result<Vec<User>, UserError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC"
    ))?;

    let rows = stmt.query_map([], map_row_to_user)?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

/// Looks up a user by email.
pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, UserError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            [email],
            map_row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Creates a user and returns the stored row.
///
/// # Errors
///
/// Returns `UserError::EmailExists` if another user already has the email,
/// including when a concurrent insert wins the race on the unique index.
pub fn create_user(conn: &Connection, new_user: &NewUser) -> Result<User, UserError> {
    if find_user_by_email(conn, &new_user.email)?.is_some() {
        return Err(UserError::EmailExists(new_user.email.clone()));
    }

    let inserted = conn.query_row(
        &format!(
            "INSERT INTO users (name, email, age) VALUES (?1, ?2, ?3) RETURNING {USER_COLUMNS}"
        ),
        params![new_user.name, new_user.email, new_user.age],
        map_row_to_user,
    );

    match inserted {
        Ok(user) => {
            tracing::info!(user_id = user.id, "created user");
            Ok(user)
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(UserError::EmailExists(new_user.email.clone()))
        }
        Err(e) => Err(e.into()),
    }
}
