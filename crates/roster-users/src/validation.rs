//! Input validation for user payloads.
//!
//! Every failure names the field it concerns so the API can echo it back.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::NewUser;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("email pattern is a valid regex")
});

/// Minimum name length in characters.
pub const NAME_MIN_LEN: usize = 2;
/// Maximum name length in characters.
pub const NAME_MAX_LEN: usize = 100;
/// Inclusive upper bound for `age`.
pub const MAX_AGE: i64 = 150;

/// A rejected input value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    /// Human readable reason.
    pub message: String,
    /// The offending field.
    pub field: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, field: &str) -> Self {
        Self {
            message: message.into(),
            field: field.to_string(),
        }
    }
}

/// Rejects a missing or blank value.
pub fn validate_required<'a>(
    value: Option<&'a str>,
    field_name: &str,
) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::new(
            format!("{field_name} is required"),
            field_name,
        )),
    }
}

/// Requires a value shaped like `local@domain.tld`.
pub fn validate_email<'a>(
    email: Option<&'a str>,
    field_name: &str,
) -> Result<&'a str, ValidationError> {
    let email = validate_required(email, field_name)?;
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ValidationError::new(
            format!("Invalid {field_name} format"),
            field_name,
        ));
    }
    Ok(email)
}

/// Requires a present value whose length in characters lies within bounds.
pub fn validate_string_length<'a>(
    value: Option<&'a str>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    field_name: &str,
) -> Result<&'a str, ValidationError> {
    let value = validate_required(value, field_name)?;
    let len = value.chars().count();

    if let Some(min) = min_length.filter(|min| len < *min) {
        return Err(ValidationError::new(
            format!("{field_name} must be at least {min} characters"),
            field_name,
        ));
    }
    if let Some(max) = max_length.filter(|max| len > *max) {
        return Err(ValidationError::new(
            format!("{field_name} must be at most {max} characters"),
            field_name,
        ));
    }

    Ok(value)
}

/// Strips characters usable for markup injection and trims whitespace.
pub fn sanitize_input(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\''))
        .collect::<String>()
        .trim()
        .to_string()
}

fn string_field<'a>(
    data: &'a Map<String, Value>,
    field_name: &str,
) -> Result<Option<&'a str>, ValidationError> {
    match data.get(field_name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ValidationError::new(
            format!("{field_name} must be a string"),
            field_name,
        )),
    }
}

fn parse_age(value: &Value) -> Result<i64, ValidationError> {
    let invalid = || ValidationError::new("Age must be a valid number", "age");
    let age = match value {
        // Fractional numbers truncate toward zero.
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    if !(0..=MAX_AGE).contains(&age) {
        return Err(ValidationError::new(
            format!("Age must be between 0 and {MAX_AGE}"),
            "age",
        ));
    }
    Ok(age)
}

/// Validates a create-user payload.
///
/// `name` and `email` are required. `age` may be left out, but a present
/// `age` must be a number or a numeric string; `null` is rejected. The name is sanitized after it
/// passes the length check.
///
/// # Errors
///
/// Returns the first `ValidationError` encountered, checking name, email,
/// then age.
pub fn validate_new_user(data: &Map<String, Value>) -> Result<NewUser, ValidationError> {
    let name = validate_string_length(
        string_field(data, "name")?,
        Some(NAME_MIN_LEN),
        Some(NAME_MAX_LEN),
        "name",
    )?;
    let email = validate_email(string_field(data, "email")?, "email")?;
    let age = match data.get("age") {
        None => None,
        Some(value) => Some(parse_age(value)?),
    };

    Ok(NewUser {
        name: sanitize_input(name),
        email: email.trim().to_string(),
        age,
    })
}
