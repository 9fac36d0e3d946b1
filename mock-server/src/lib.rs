use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Name of the session cookie set by `/login`.
pub const SESSION_COOKIE: &str = "session";

#[derive(Default)]
pub struct Backend {
    /// session token -> user name
    sessions: HashMap<String, String>,
    etag: Option<String>,
    revision: u64,
}

pub type Db = Arc<RwLock<Backend>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Backend::default()));
    Router::new()
        .route("/ping", get(ping))
        .route("/login", post(login))
        .route("/whoami", get(whoami))
        .route("/echo", post(echo))
        .route("/save", post(save))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({"success": false, "error": error}))).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

async fn ping() -> Json<Value> {
    Json(json!({"success": true}))
}

async fn login(State(db): State<Db>, Form(form): Form<HashMap<String, String>>) -> Response {
    let Some(user) = form.get("user").filter(|u| !u.is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "missing user");
    };
    let token = Uuid::new_v4().to_string();
    db.write().await.sessions.insert(token.clone(), user.clone());
    (
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly"))],
        Json(json!({"success": true, "user": user})),
    )
        .into_response()
}

async fn whoami(State(db): State<Db>, headers: HeaderMap) -> Response {
    let backend = db.read().await;
    match session_token(&headers).and_then(|t| backend.sessions.get(&t).cloned()) {
        Some(user) => Json(json!({"success": true, "user": user})).into_response(),
        None => failure(StatusCode::UNAUTHORIZED, "not logged in"),
    }
}

async fn echo(Form(fields): Form<Vec<(String, String)>>) -> Json<Value> {
    let fields: Map<String, Value> = fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    Json(json!({"success": true, "fields": fields}))
}

async fn save(
    State(db): State<Db>,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let mut backend = db.write().await;
    let if_match = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok());
    if let Some(current) = &backend.etag {
        if if_match != Some(current.as_str()) {
            return failure(StatusCode::PRECONDITION_FAILED, "stale write");
        }
    }
    backend.revision += 1;
    let etag = format!("\"rev-{}\"", backend.revision);
    backend.etag = Some(etag.clone());
    (
        [(header::ETAG, etag.clone())],
        Json(json!({"success": true, "etag": etag, "saved": fields.len()})),
    )
        .into_response()
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => failure(status, &format!("status {code}")),
        Err(_) => failure(StatusCode::BAD_REQUEST, "invalid status"),
    }
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({"success": true, "slept_ms": ms}))
}
