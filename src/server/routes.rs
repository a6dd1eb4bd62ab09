use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use super::error::AppError;
use super::state::ServerState;
use super::store::create_plan;
use crate::plan::{parse_plan_request, PlanCode, PlanDocument};

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn get_plan_handler(
    State(state): State<Arc<ServerState>>,
    Path(code): Path<String>,
) -> Result<Json<PlanDocument>, AppError> {
    let code = PlanCode::parse(&code)?;
    debug!(%code, "plan lookup");

    let plans = state.plans.clone();
    let lookup = code.clone();
    let found = tokio::task::spawn_blocking(move || plans.find(&lookup))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    found
        .map(Json)
        .ok_or_else(|| AppError::NotFound(code.to_string()))
}

pub async fn create_plan_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (code, rows) = parse_plan_request(&body)?;
    debug!(%code, rows = rows.len(), "plan create");

    let plans = state.plans.clone();
    let doc = tokio::task::spawn_blocking(move || create_plan(plans.as_ref(), code, rows))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(Json(json!({ "ok": true, "data": doc })))
}
