//! API handlers for the Roster server.
//!
//! Every response body is JSON. Failures use the shape
//! `{"success": false, "error": ..., "field"?: ...}`.

use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use roster_users::{create_user, list_users, validate_new_user, User, UserError, ValidationError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {message}")]
    BadRequest {
        message: String,
        field: Option<String>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest {
            message: err.message,
            field: Some(err.field),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Database(e) => {
                ApiError::InternalServerError(format!("db query failed: {}", e))
            }
            conflict @ UserError::EmailExists(_) => ApiError::Conflict(conflict.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, field) = match self {
            ApiError::BadRequest { message, field } => (StatusCode::BAD_REQUEST, message, field),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
                None,
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
        });
        if let Some(field) = field {
            body["field"] = Value::String(field);
        }

        (status, Json(body)).into_response()
    }
}

/// Runs a blocking database closure on a pooled connection.
async fn with_conn<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Handler for `GET /`.
///
/// Reports `healthy` only when a pooled connection can run a query.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let check = with_conn(state, |conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| ApiError::InternalServerError(format!("db query failed: {}", e)))
    })
    .await;

    match check {
        Ok(_) => Json(json!({
            "status": "healthy",
            "timestamp": timestamp(),
            "version": env!("CARGO_PKG_VERSION"),
            "database": "connected",
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": timestamp(),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Response body for `GET /api/users`.
#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub success: bool,
    pub data: Vec<User>,
    pub count: usize,
}

/// Response body for a created user.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub data: User,
}

/// Handler for `GET /api/users`.
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    let users = with_conn(state, |conn| Ok(list_users(conn)?)).await?;

    Ok(Json(ListUsersResponse {
        success: true,
        count: users.len(),
        data: users,
    }))
}

/// Handler for `POST /api/users`.
pub async fn create_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest {
        message: format!("invalid JSON body: {}", e.body_text()),
        field: None,
    })?;

    let data = match payload {
        Value::Object(map) if !map.is_empty() => map,
        Value::Object(_) => {
            return Err(ApiError::BadRequest {
                message: "No data provided".to_string(),
                field: None,
            })
        }
        _ => {
            return Err(ApiError::BadRequest {
                message: "request body must be a JSON object".to_string(),
                field: None,
            })
        }
    };

    let new_user = validate_new_user(&data)?;
    let user = with_conn(state, move |conn| Ok(create_user(conn, &new_user)?)).await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            success: true,
            data: user,
        }),
    ))
}

/// Fallback for unknown paths.
pub async fn not_found_handler() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

/// Fallback for known paths hit with an unsupported method.
pub async fn method_not_allowed_handler() -> ApiError {
    ApiError::MethodNotAllowed
}
