use serde_json::Value;

use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::tracker::{ExamBook, TrackerError};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<TrackerError> for HandlerErr {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::UnknownExam(_) => Self::new("not_found", e.to_string()),
            TrackerError::EmptyName | TrackerError::InvalidGrade(_) => {
                Self::bad_params(e.to_string())
            }
        }
    }
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Credits from a number or numeric string; fractions are floored.
pub fn get_cfu(params: &Value, key: &str) -> Result<Option<u32>, HandlerErr> {
    let parsed = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(v.floor().min(f64::from(u32::MAX)) as u32)),
        _ => Err(HandlerErr::bad_params(format!(
            "{} must be a non-negative number",
            key
        ))),
    }
}

/// Grade as entered. `null` clears the grade; numbers are stringified.
pub fn get_grade(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(String::new())),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be a string, number or null",
            key
        ))),
    }
}

/// Saves `next` and only then makes it the live list, so a failed write
/// leaves the in-memory state untouched.
pub fn commit_book(state: &mut AppState, next: ExamBook) -> Result<(), HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    next.save(conn)
        .map_err(|e| HandlerErr::new("db_write_failed", e.to_string()))?;
    state.book = next;
    Ok(())
}

pub fn require_workspace(state: &AppState) -> Result<(), HandlerErr> {
    if state.db.is_none() {
        return Err(HandlerErr::no_workspace());
    }
    Ok(())
}
