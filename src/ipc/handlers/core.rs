use crate::db;
use crate::ipc::helpers::{get_optional_str, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::tracker::ExamBook;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "planStoreUrl": state.plan_store_url,
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);

    let conn = db::open_db(&path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let (book, migrated) =
        ExamBook::load(&conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    if let Some(url) = get_optional_str(&req.params, "planStoreUrl") {
        state.plan_store_url = url;
    }
    info!(workspace = %path.display(), exams = book.exams().len(), migrated, "workspace selected");

    let exam_count = book.exams().len();
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.book = book;
    state.fetched_plan = None;

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "examCount": exam_count,
        "migrated": migrated,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
