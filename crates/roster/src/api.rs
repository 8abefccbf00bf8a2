//! HTTP API: register members and list the local view.

use crate::member::{Member, RegisterMember};
use crate::reconciler::{Reconciler, RegistrationError};
use crate::store::StoreError;
use crate::stream::ConnectionState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub stream_state: watch::Receiver<ConnectionState>,
}

pub enum ApiError {
    Registration(RegistrationError),
    Store(StoreError),
}

impl From<RegistrationError> for ApiError {
    fn from(e: RegistrationError) -> Self {
        ApiError::Registration(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Registration(RegistrationError::InvalidMember) => {
                (StatusCode::BAD_REQUEST, "Invalid member".to_string())
            }
            ApiError::Registration(e @ RegistrationError::Gateway(_)) => {
                tracing::warn!(reason = %e, "member registration rejected by gateway");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            ApiError::Registration(RegistrationError::Store(e)) | ApiError::Store(e) => {
                tracing::error!(reason = %e, "member store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct Submitted {
    status: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    stream: &'static str,
}

pub fn router(state: AppState) -> Router {
    let members = Router::new().route("/members", put(register_member).get(list_members));
    Router::new()
        .merge(members.clone())
        .nest("/api/v1", members)
        .route("/health", get(health))
        .with_state(state)
}

async fn register_member(
    State(state): State<AppState>,
    body: Result<Json<RegisterMember>, JsonRejection>,
) -> Result<Json<Submitted>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(reason = %rejection, "unreadable member body");
        RegistrationError::InvalidMember
    })?;
    state.reconciler.register_locally(&request).await?;
    Ok(Json(Submitted { status: "submitted" }))
}

async fn list_members(State(state): State<AppState>) -> Result<Json<Vec<Member>>, ApiError> {
    Ok(Json(state.reconciler.store().list().await?))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        stream: state.stream_state.borrow().as_str(),
    })
}
