use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calc::{self, AverageSummary};
use crate::db;
use crate::plan_csv::parse_cfu;

pub const EXAMS_KEY: &str = "tracker.exams";
pub const EXAMS_SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub name: String,
    pub cfu: u32,
    /// Empty until a grade is recorded.
    #[serde(default)]
    pub grade: String,
}

impl Exam {
    pub fn new(name: &str, cfu: u32, grade: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            cfu,
            grade: grade.trim().to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("exam name must not be empty")]
    EmptyName,

    #[error("grade '{0}' must be empty or a number between 0 and 30")]
    InvalidGrade(String),

    #[error("exam not found: {0}")]
    UnknownExam(String),
}

/// Field edits for one exam. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExamPatch {
    pub name: Option<String>,
    pub cfu: Option<u32>,
    pub grade: Option<String>,
}

fn check_grade(grade: &str) -> Result<String, TrackerError> {
    let t = grade.trim();
    if t.is_empty() || calc::parse_grade(t).is_some() {
        Ok(t.to_string())
    } else {
        Err(TrackerError::InvalidGrade(grade.to_string()))
    }
}

fn check_name(name: &str) -> Result<String, TrackerError> {
    let t = name.trim();
    if t.is_empty() {
        Err(TrackerError::EmptyName)
    } else {
        Ok(t.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamBook {
    exams: Vec<Exam>,
}

impl ExamBook {
    pub fn new(exams: Vec<Exam>) -> Self {
        Self { exams }
    }

    /// Loads the list from the workspace, migrating and re-saving it when the
    /// stored document was not in the current shape. Returns whether a
    /// migration happened.
    pub fn load(conn: &Connection) -> anyhow::Result<(Self, bool)> {
        let Some(raw) = db::settings_get_json(conn, EXAMS_KEY)? else {
            return Ok((Self::default(), false));
        };
        let migrated = migrate_exams(&raw);
        let book = Self::new(migrated.exams);
        if migrated.changed {
            info!(
                exams = book.exams.len(),
                dropped = migrated.dropped,
                "migrated stored exam list"
            );
            book.save(conn)?;
        }
        Ok((book, migrated.changed))
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        let doc = json!({
            "version": EXAMS_SCHEMA_VERSION,
            "exams": self.exams,
        });
        db::settings_set_json(conn, EXAMS_KEY, &doc)?;
        debug!(exams = self.exams.len(), "saved exam list");
        Ok(())
    }

    pub fn exams(&self) -> &[Exam] {
        &self.exams
    }

    pub fn get(&self, exam_id: &str) -> Option<&Exam> {
        self.exams.iter().find(|e| e.id == exam_id)
    }

    pub fn summary(&self) -> AverageSummary {
        calc::summarize(&self.exams)
    }

    pub fn add(&mut self, name: &str, cfu: u32, grade: &str) -> Result<&Exam, TrackerError> {
        let name = check_name(name)?;
        let grade = check_grade(grade)?;
        self.exams.push(Exam::new(&name, cfu, &grade));
        Ok(&self.exams[self.exams.len() - 1])
    }

    /// Appends already-built exams (merge results).
    pub fn extend(&mut self, exams: impl IntoIterator<Item = Exam>) {
        self.exams.extend(exams);
    }

    pub fn update(&mut self, exam_id: &str, patch: ExamPatch) -> Result<&Exam, TrackerError> {
        let name = patch.name.as_deref().map(check_name).transpose()?;
        let grade = patch.grade.as_deref().map(check_grade).transpose()?;
        let Some(exam) = self.exams.iter_mut().find(|e| e.id == exam_id) else {
            return Err(TrackerError::UnknownExam(exam_id.to_string()));
        };
        if let Some(name) = name {
            exam.name = name;
        }
        if let Some(cfu) = patch.cfu {
            exam.cfu = cfu;
        }
        if let Some(grade) = grade {
            exam.grade = grade;
        }
        Ok(exam)
    }

    pub fn remove(&mut self, exam_id: &str) -> Result<Exam, TrackerError> {
        let Some(pos) = self.exams.iter().position(|e| e.id == exam_id) else {
            return Err(TrackerError::UnknownExam(exam_id.to_string()));
        };
        Ok(self.exams.remove(pos))
    }

    pub fn reset(&mut self) -> usize {
        let n = self.exams.len();
        self.exams.clear();
        n
    }

    pub fn replace_all(&mut self, exams: Vec<Exam>) {
        self.exams = exams;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigratedExams {
    pub exams: Vec<Exam>,
    pub changed: bool,
    pub dropped: usize,
}

/// Reads any known shape of the stored exam list.
///
/// - v1: a bare array of exam objects
/// - v2: `{ "version": 2, "exams": [...] }`
pub fn migrate_exams(raw: &Value) -> MigratedExams {
    let (entries, mut changed) = match raw {
        Value::Array(items) => (items.as_slice(), true),
        Value::Object(obj) => match obj.get("exams").and_then(|v| v.as_array()) {
            Some(items) => {
                let version = obj.get("version").and_then(|v| v.as_u64());
                (items.as_slice(), version != Some(EXAMS_SCHEMA_VERSION))
            }
            None => (&[][..], true),
        },
        Value::Null => (&[][..], false),
        _ => (&[][..], true),
    };

    let mut seen = HashSet::new();
    let mut exams = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;
    for entry in entries {
        match coerce_exam(entry, &mut seen) {
            Some((exam, rewritten)) => {
                changed |= rewritten;
                exams.push(exam);
            }
            None => {
                changed = true;
                dropped += 1;
            }
        }
    }

    MigratedExams {
        exams,
        changed,
        dropped,
    }
}

fn coerce_exam(entry: &Value, seen: &mut HashSet<String>) -> Option<(Exam, bool)> {
    let obj = entry.as_object()?;
    let mut rewritten = false;

    let name = match obj.get("name") {
        Some(Value::String(s)) => {
            rewritten |= s.trim() != s;
            s.trim().to_string()
        }
        Some(Value::Number(n)) => {
            rewritten = true;
            n.to_string()
        }
        _ => return None,
    };
    if name.is_empty() {
        return None;
    }

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => {
            rewritten = true;
            n.to_string()
        }
        _ => {
            rewritten = true;
            Uuid::new_v4().to_string()
        }
    };
    let id = if seen.contains(&id) {
        rewritten = true;
        Uuid::new_v4().to_string()
    } else {
        id
    };
    seen.insert(id.clone());

    let cfu = match obj.get("cfu") {
        Some(Value::Number(n)) if n.as_u64().is_some_and(|v| v <= u64::from(u32::MAX)) => {
            n.as_u64().map(|v| v as u32).unwrap_or(0)
        }
        Some(Value::Number(n)) => {
            rewritten = true;
            parse_cfu(&n.to_string())
        }
        Some(Value::String(s)) => {
            rewritten = true;
            parse_cfu(s)
        }
        _ => {
            rewritten = true;
            0
        }
    };

    let grade = match obj.get("grade") {
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() || calc::parse_grade(t).is_some() {
                rewritten |= t != s;
                t.to_string()
            } else {
                rewritten = true;
                String::new()
            }
        }
        Some(Value::Number(n)) => {
            rewritten = true;
            match n.as_f64().filter(|g| calc::parse_grade(&g.to_string()).is_some()) {
                Some(g) => g.to_string(),
                None => String::new(),
            }
        }
        None | Some(Value::Null) => {
            rewritten |= obj.contains_key("grade");
            String::new()
        }
        _ => {
            rewritten = true;
            String::new()
        }
    };

    Some((
        Exam {
            id,
            name,
            cfu,
            grade,
        },
        rewritten,
    ))
}
