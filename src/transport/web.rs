//! HTTP/JSON transport: raw CRUD over the stores, no sessions and no relay.
//!
//! | Method | Path             | Body                    | Success |
//! |--------|------------------|-------------------------|---------|
//! | POST   | `/api/login`     | `{username, password}`  | 200     |
//! | POST   | `/api/register`  | `{username, password}`  | 201     |
//! | GET    | `/api/messages`  |                         | 200     |
//! | POST   | `/api/messages`  | `{username, message}`   | 201     |
//!
//! Malformed JSON is a 400. When `web_root` names a directory its files are
//! served for every other path.
use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::bbs::server::sec_log;
use crate::bbs::BbsContext;
use crate::logutil::escape_log;
use crate::metrics;
use crate::storage::{PostError, RegisterError};

pub type AppState = Arc<BbsContext>;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub username: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct Reply {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error response: a status code with a JSON `{"error": ...}` body.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

fn internal(context: &str, e: impl std::fmt::Display) -> ApiError {
    error!("HTTP {}: {}", context, e);
    ApiError(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error, please try again later".into(),
    )
}

fn reply(status: StatusCode, message: &str) -> (StatusCode, Json<Reply>) {
    (
        status,
        Json(Reply {
            message: message.to_string(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/login", post(login))
        .route("/api/register", post(register))
        .route("/api/messages", get(list_messages).post(post_message));

    let app = match state.config.web.web_root.as_deref() {
        Some(root) if Path::new(root).is_dir() => {
            info!("Serving static files from {}", root);
            api.fallback_service(ServeDir::new(root))
        }
        _ => api,
    };
    app.with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(creds) = payload?;
    let username = creds.username.trim();
    match state.users.authenticate(username, &creds.password).await {
        Ok(true) => {
            metrics::inc_login_ok();
            Ok(reply(StatusCode::OK, "Login successful"))
        }
        Ok(false) => {
            metrics::inc_login_failed();
            sec_log!("Failed HTTP login for {}", escape_log(username));
            Err(ApiError(
                StatusCode::UNAUTHORIZED,
                "Invalid username or password".into(),
            ))
        }
        Err(e) => Err(internal("login", e)),
    }
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(creds) = payload?;
    let username = creds.username.trim();
    match state.users.create_user(username, &creds.password).await {
        Ok(()) => {
            metrics::inc_registration();
            Ok(reply(StatusCode::CREATED, "User created successfully"))
        }
        Err(RegisterError::Store(e)) => Err(internal("register", e)),
        Err(e) => Err(ApiError(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state
        .board
        .get_messages()
        .await
        .map(Json)
        .map_err(|e| internal("list messages", e))
}

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(msg) = payload?;
    // Authors are not authenticated here; reject names a session could never use.
    crate::validation::validate_username(msg.username.trim())
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("Invalid username: {}", e)))?;
    match state.board.post_message(msg.username.trim(), &msg.message).await {
        Ok(()) => {
            metrics::inc_message_posted();
            Ok(reply(StatusCode::CREATED, "Message posted successfully"))
        }
        Err(PostError::Invalid(e)) => Err(ApiError(StatusCode::BAD_REQUEST, e.to_string())),
        Err(PostError::Store(e)) => Err(internal("post message", e)),
    }
}
