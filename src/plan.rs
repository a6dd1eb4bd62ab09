use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Upper bound on stored rows per plan; extra rows are cut after cleaning.
pub const MAX_PLAN_ROWS: usize = 200;
pub const MIN_ROW_CFU: i64 = 1;
pub const MAX_ROW_CFU: i64 = 30;

fn code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{2}-[0-9]{2}$").expect("plan code pattern"))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid plan code '{0}': expected two digits, a dash and two digits")]
    InvalidCode(String),

    #[error("rows must be a non-empty array")]
    MissingRows,

    #[error("row {index}: {reason}")]
    InvalidRow { index: usize, reason: &'static str },

    #[error("no valid rows left after cleaning")]
    NoValidRows,
}

/// Validated plan code (`07-89`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanCode(String);

impl PlanCode {
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        let t = raw.trim();
        if code_pattern().is_match(t) {
            Ok(Self(t.to_string()))
        } else {
            Err(PlanError::InvalidCode(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PlanCode {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PlanCode> for String {
    fn from(code: PlanCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRow {
    pub codice: String,
    pub denominazione: String,
    pub cfu: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub code: PlanCode,
    pub rows: Vec<PlanRow>,
    pub updated_at: DateTime<Utc>,
}

/// A row that passed shape validation but has not been cleaned yet.
#[derive(Debug, Clone, PartialEq)]
struct RawRow {
    codice: String,
    denominazione: String,
    cfu: i64,
}

/// Validates a `{code, rows}` request body and returns the cleaned rows.
pub fn parse_plan_request(body: &Value) -> Result<(PlanCode, Vec<PlanRow>), PlanError> {
    let code = body
        .get("code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlanError::InvalidCode(String::new()))?;
    let code = PlanCode::parse(code)?;

    let rows = body
        .get("rows")
        .and_then(|v| v.as_array())
        .filter(|rows| !rows.is_empty())
        .ok_or(PlanError::MissingRows)?;

    let raw = rows
        .iter()
        .enumerate()
        .map(|(index, row)| parse_raw_row(index, row))
        .collect::<Result<Vec<_>, _>>()?;

    let cleaned = clean_rows(raw);
    if cleaned.is_empty() {
        return Err(PlanError::NoValidRows);
    }
    Ok((code, cleaned))
}

fn parse_raw_row(index: usize, row: &Value) -> Result<RawRow, PlanError> {
    let Some(obj) = row.as_object() else {
        return Err(PlanError::InvalidRow {
            index,
            reason: "row must be an object",
        });
    };
    let Some(codice) = obj.get("codice").and_then(|v| v.as_str()) else {
        return Err(PlanError::InvalidRow {
            index,
            reason: "codice must be a string",
        });
    };
    let Some(denominazione) = obj.get("denominazione").and_then(|v| v.as_str()) else {
        return Err(PlanError::InvalidRow {
            index,
            reason: "denominazione must be a string",
        });
    };
    let cfu = match obj.get("cfu") {
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.is_finite() && f.fract() == 0.0 => f as i64,
            _ => {
                return Err(PlanError::InvalidRow {
                    index,
                    reason: "cfu must be an integer",
                })
            }
        },
        _ => {
            return Err(PlanError::InvalidRow {
                index,
                reason: "cfu must be an integer",
            })
        }
    };

    Ok(RawRow {
        codice: codice.to_string(),
        denominazione: denominazione.to_string(),
        cfu,
    })
}

fn clean_rows(raw: Vec<RawRow>) -> Vec<PlanRow> {
    raw.into_iter()
        .filter_map(|r| {
            let codice = r.codice.trim();
            let denominazione = r.denominazione.trim();
            if codice.is_empty() || denominazione.is_empty() {
                return None;
            }
            Some(PlanRow {
                codice: codice.to_string(),
                denominazione: denominazione.to_string(),
                cfu: r.cfu.clamp(MIN_ROW_CFU, MAX_ROW_CFU) as u32,
            })
        })
        .take(MAX_PLAN_ROWS)
        .collect()
}
