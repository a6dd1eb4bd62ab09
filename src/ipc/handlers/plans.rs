use crate::ipc::helpers::{
    commit_book, get_optional_str, get_required_str, require_workspace, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::merge;
use crate::plan::{PlanCode, PlanRow};
use crate::plan_csv;
use crate::remote::{PlanStoreClient, RemoteError};
use crate::tracker::Exam;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of sharing an imported plan with the store.
#[derive(Default)]
struct Publish {
    published: bool,
    already_shared: bool,
    error: Option<String>,
}

/// Shares the plan unless the store already has one under `code`. The
/// stored plan always wins; a conflict is never retried or overwritten.
fn publish(base_url: &str, code: &PlanCode, rows: &[PlanRow]) -> Publish {
    let attempt = || -> Result<Publish, RemoteError> {
        let client = PlanStoreClient::new(base_url)?;
        if client.fetch(code)?.is_some() {
            return Ok(Publish {
                already_shared: true,
                ..Publish::default()
            });
        }
        match client.create(code, rows) {
            Ok(_) => Ok(Publish {
                published: true,
                ..Publish::default()
            }),
            Err(RemoteError::Conflict(_)) => Ok(Publish {
                already_shared: true,
                ..Publish::default()
            }),
            Err(e) => Err(e),
        }
    };
    attempt().unwrap_or_else(|e| {
        warn!(%code, error = %e, "plan not published");
        Publish {
            error: Some(e.to_string()),
            ..Publish::default()
        }
    })
}

fn handle_plans_import_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let path = PathBuf::from(get_required_str(&req.params, "path")?);

    let (code, parsed) = plan_csv::read_plan_file(&path).map_err(|e| {
        HandlerErr::new("import_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;

    let exams: Vec<Exam> = parsed
        .rows
        .iter()
        .map(|r| Exam::new(&r.denominazione, r.cfu, ""))
        .collect();
    let mut next = state.book.clone();
    next.replace_all(exams);
    commit_book(state, next)?;
    info!(%code, rows = parsed.rows.len(), dropped = parsed.dropped, "plan imported");

    let shared = publish(&state.plan_store_url, &code, &parsed.rows);

    let mut result = json!({
        "code": code,
        "imported": parsed.rows.len(),
        "dropped": parsed.dropped,
        "encoding": parsed.encoding,
        "delimiter": parsed.delimiter.to_string(),
        "published": shared.published,
        "alreadyShared": shared.already_shared,
    });
    if let Some(e) = shared.error {
        result["publishError"] = json!(e);
    }
    Ok(result)
}

fn handle_plans_fetch(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let raw = get_required_str(&req.params, "code")?;
    let code = PlanCode::parse(&raw).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let plan_store_failed = |e: RemoteError| HandlerErr::new("plan_store_failed", e.to_string());
    let client = PlanStoreClient::new(&state.plan_store_url).map_err(plan_store_failed)?;
    match client.fetch(&code).map_err(plan_store_failed)? {
        Some(plan) => {
            let result = json!({ "found": true, "plan": plan });
            state.fetched_plan = Some(plan);
            Ok(result)
        }
        None => {
            state.fetched_plan = None;
            Ok(json!({ "found": false }))
        }
    }
}

fn handle_plans_merge(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let indices: Option<Vec<usize>> = match req.params.get("indices") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .map(|i| i as usize)
                        .ok_or_else(|| HandlerErr::bad_params("indices must be non-negative integers"))
                })
                .collect::<Result<_, _>>()?,
        ),
        Some(_) => return Err(HandlerErr::bad_params("indices must be an array")),
    };
    let Some(plan) = state.fetched_plan.as_ref() else {
        return Err(HandlerErr::bad_params("fetch a plan before merging"));
    };

    let rows = merge::select_rows(plan, indices.as_deref()).map_err(|i| {
        HandlerErr::bad_params(format!("row index out of range: {i}"))
            .with_details(json!({ "index": i, "rows": plan.rows.len() }))
    })?;
    let outcome = merge::merge_rows(state.book.exams(), rows);
    let added = outcome.added.len();

    let mut next = state.book.clone();
    next.extend(outcome.added);
    commit_book(state, next)?;

    Ok(json!({
        "added": added,
        "skipped": outcome.skipped,
        "summary": state.book.summary(),
    }))
}

fn write_file(path: &Path, contents: &str) -> Result<(), HandlerErr> {
    std::fs::write(path, contents).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    })
}

fn handle_plans_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = get_optional_str(&req.params, "outPath")
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params("missing outPath"))?;
    let Some(plan) = state.fetched_plan.as_ref() else {
        return Err(HandlerErr::bad_params("fetch a plan before exporting it"));
    };

    write_file(&out_path, &plan_csv::write_plan_csv(&plan.rows))?;

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "rowsExported": plan.rows.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "plans.importCsv" => handle_plans_import_csv(state, req),
        "plans.fetch" => handle_plans_fetch(state, req),
        "plans.merge" => handle_plans_merge(state, req),
        "plans.exportCsv" => handle_plans_export_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
