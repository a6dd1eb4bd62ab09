use crate::calc;
use crate::ipc::helpers::{get_grade, get_required_str, require_workspace, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::tracker::TrackerError;
use serde_json::{json, Value};

fn handle_average_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    Ok(json!(state.book.summary()))
}

fn handle_average_what_if(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_workspace(state)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let grade = get_grade(&req.params, "grade")?.unwrap_or_default();
    if state.book.get(&exam_id).is_none() {
        return Err(TrackerError::UnknownExam(exam_id).into());
    }

    let exams = state.book.exams();
    Ok(json!({
        "current": calc::weighted_average(exams),
        "simulated": calc::what_if(exams, &exam_id, &grade),
        // false when the hypothetical grade was ignored
        "applied": calc::parse_grade(&grade).is_some(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "average.get" => handle_average_get(state, req),
        "average.whatIf" => handle_average_what_if(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
