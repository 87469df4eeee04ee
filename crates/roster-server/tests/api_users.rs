use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use roster_db::{create_pool, run_migrations, ConnectionSettings, DbPool};
use roster_server::{app, config::DatabaseConfig, init_database, AppState};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

/// Every pooled `:memory:` connection is its own database, so pin the pool
/// to a single connection.
fn memory_pool() -> DbPool {
    let settings = ConnectionSettings {
        pool_max_size: 1,
        ..ConnectionSettings::in_memory()
    };
    create_pool(&settings).unwrap()
}

fn setup_app() -> Router {
    let pool = memory_pool();
    {
        let mut conn = pool.get().unwrap();
        run_migrations(&mut conn).unwrap();
    }
    app(AppState { pool })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn sample_user() -> Value {
    json!({"name": "Test User", "email": "test@example.com", "age": 25})
}

#[tokio::test]
async fn health_check_reports_connected_database() {
    let (status, json) = send(setup_app(), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "connected");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn health_check_reports_unreachable_database() {
    let pool: DbPool = r2d2::Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_millis(200))
        .build(r2d2_sqlite::SqliteConnectionManager::memory())
        .unwrap();
    let _held = pool.get().unwrap();

    let (status, json) = send(app(AppState { pool: pool.clone() }), get("/")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "unhealthy");
    assert!(json["error"].is_string());
    assert!(json.get("database").is_none());
}

#[tokio::test]
async fn create_then_list_users() {
    let app = setup_app();

    let (status, json) = send(app.clone(), post_json("/api/users", &sample_user())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["name"], "Test User");
    assert_eq!(json["data"]["email"], "test@example.com");
    assert_eq!(json["data"]["age"], 25);
    assert_eq!(json["data"]["status"], "active");

    let second = json!({"name": "Jane Smith", "email": "jane@example.com"});
    let (status, _) = send(app.clone(), post_json("/api/users", &second)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(app, get("/api/users")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 2);
    assert_eq!(json["data"][0]["name"], "Jane Smith");
    assert_eq!(json["data"][1]["name"], "Test User");
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = setup_app();
    send(app.clone(), post_json("/api/users", &sample_user())).await;

    let (status, json) = send(app, post_json("/api/users", &sample_user())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Email already exists"));
}

#[tokio::test]
async fn validation_failures_name_the_field() {
    let cases = [
        (json!({"name": "", "email": "test@example.com", "age": 25}), "name"),
        (json!({"name": "Test User", "email": "invalid-email", "age": 25}), "email"),
        (json!({"name": "Test User", "email": "test@example.com", "age": "not-a-number"}), "age"),
    ];

    for (body, field) in cases {
        let (status, json) = send(setup_app(), post_json("/api/users", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload: {body}");
        assert_eq!(json["success"], false);
        assert_eq!(json["field"], field);
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn empty_or_malformed_body_is_rejected() {
    let (status, json) = send(setup_app(), post_json("/api/users", &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let request = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(setup_app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn name_is_sanitized_before_storage() {
    let body = json!({"name": "<Bob>", "email": "bob@example.com"});
    let (status, json) = send(setup_app(), post_json("/api/users", &body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["name"], "Bob");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (status, json) = send(setup_app(), get("/nonexistent-endpoint")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Endpoint not found");
}

#[tokio::test]
async fn wrong_method_is_not_allowed() {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(setup_app(), request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Method not allowed");
}

#[tokio::test]
async fn missing_schema_surfaces_as_server_error() {
    let app = app(AppState {
        pool: memory_pool(),
    });

    let (status, json) = send(app, get("/api/users")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn init_database_migrates_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let database = DatabaseConfig {
        name: dir.path().join("roster.db").to_string_lossy().into_owned(),
        ..DatabaseConfig::default()
    };

    let pool = tokio::task::spawn_blocking(move || init_database(&database))
        .await
        .unwrap()
        .expect("database should initialize");

    let (status, json) = send(app(AppState { pool }), get("/api/users")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 0);
}
