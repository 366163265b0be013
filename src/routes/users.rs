use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    models::user::{CreateUserRequest, UpdateUserRequest},
    services::users::UserService,
    AppState,
};

type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn backend(state: &AppState) -> Result<Arc<UserService>, ApiError> {
    state.users.clone().ok_or_else(|| {
        error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "backend configuration unavailable",
        )
    })
}

pub async fn method_not_allowed() -> ApiError {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Create a user: auth identity + optional avatar + profile row, bounded
/// by an overall deadline so a stalled backend call cannot hold the
/// request open forever.
pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let users = backend(&state)?;

    // An unreadable body gets the same contract message as absent fields.
    let Json(request) = body.map_err(|_| {
        error_body(
            StatusCode::BAD_REQUEST,
            "Missing required fields: full_name, email, role",
        )
    })?;

    let deadline = Duration::from_secs(state.config.provision_timeout_secs);
    let created = tokio::time::timeout(deadline, users.provision(request))
        .await
        .map_err(|_| error_body(StatusCode::GATEWAY_TIMEOUT, "User creation timed out"))?
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, &e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": created })),
    ))
}

/// List all users, newest first.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let users = backend(&state)?;
    let list = users
        .list()
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;
    Ok(Json(serde_json::to_value(list).unwrap()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let users = backend(&state)?;
    let user = users
        .fetch(&id.to_string())
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;
    match user {
        Some(user) => Ok(Json(serde_json::to_value(user).unwrap())),
        None => Err(error_body(StatusCode::NOT_FOUND, "User not found")),
    }
}

/// Partial update of a profile row.
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let users = backend(&state)?;
    if body.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "No changes provided"));
    }
    users
        .update(&id.to_string(), &body)
        .await
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, &e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

/// Delete the profile row; the identity and avatar cleanups behind it are
/// best-effort.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let users = backend(&state)?;
    users
        .remove(&id.to_string())
        .await
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, &e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}
