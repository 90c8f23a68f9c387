//! `GET /users/<user>/last_execution_id`.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::Result;
use crate::http::AppState;

pub async fn last_execution_id(State(state): State<AppState>, Path(user): Path<String>) -> Result<Json<serde_json::Value>> {
    match state.last_execution_for(&user).await? {
        Some(execution_id) => Ok(Json(serde_json::json!({ "execution_id": execution_id }))),
        None => Ok(Json(serde_json::json!({}))),
    }
}
