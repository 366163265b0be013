use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let backend = if state.users.is_some() {
        "configured"
    } else {
        "unconfigured"
    };
    Json(json!({ "status": "ok", "backend": backend }))
}
