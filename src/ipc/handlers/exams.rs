use crate::ipc::helpers::{
    commit_book, get_cfu, get_grade, get_optional_str, get_required_str, require_workspace,
    respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::plan_csv;
use crate::tracker::ExamPatch;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

fn handle_exams_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    Ok(json!({
        "exams": state.book.exams(),
        "summary": state.book.summary(),
    }))
}

fn handle_exams_add(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let name = get_required_str(&req.params, "name")?;
    let cfu = get_cfu(&req.params, "cfu")?.ok_or_else(|| HandlerErr::bad_params("missing cfu"))?;
    let grade = get_grade(&req.params, "grade")?.unwrap_or_default();

    let mut next = state.book.clone();
    let exam = next.add(&name, cfu, &grade)?.clone();
    commit_book(state, next)?;

    Ok(json!({ "exam": exam, "summary": state.book.summary() }))
}

fn handle_exams_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let patch = ExamPatch {
        name: match req.params.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(HandlerErr::bad_params("name must be a string")),
        },
        cfu: get_cfu(&req.params, "cfu")?,
        grade: get_grade(&req.params, "grade")?,
    };

    let mut next = state.book.clone();
    let exam = next.update(&exam_id, patch)?.clone();
    commit_book(state, next)?;

    Ok(json!({ "exam": exam, "summary": state.book.summary() }))
}

fn handle_exams_remove(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let exam_id = get_required_str(&req.params, "examId")?;

    let mut next = state.book.clone();
    let removed = next.remove(&exam_id)?;
    commit_book(state, next)?;

    Ok(json!({ "removed": removed, "summary": state.book.summary() }))
}

fn handle_exams_reset(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let mut next = state.book.clone();
    let removed = next.reset();
    commit_book(state, next)?;
    info!(removed, "exam list reset");
    Ok(json!({ "removed": removed }))
}

fn handle_exams_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let out_path = get_optional_str(&req.params, "outPath")
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params("missing outPath"))?;

    let exams = state.book.exams();
    std::fs::write(&out_path, plan_csv::write_exams_csv(exams)).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "rowsExported": exams.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "exams.list" => handle_exams_list(state, req),
        "exams.add" => handle_exams_add(state, req),
        "exams.update" => handle_exams_update(state, req),
        "exams.remove" => handle_exams_remove(state, req),
        "exams.reset" => handle_exams_reset(state, req),
        "exams.exportCsv" => handle_exams_export_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
