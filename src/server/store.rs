//! # Plan table
//!
//! Insert-once, read-many storage of plan documents keyed by code.
//!
//! Creation is a read-before-write: look the code up, insert when absent.
//! Two writers can both pass the lookup; the primary key on `code` then
//! rejects the second insert, which is reported as [`StoreError::Duplicate`]
//! exactly like a plan found by the lookup. There is no application-level
//! lock around the two steps.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

use crate::db;
use crate::plan::{PlanCode, PlanDocument, PlanRow};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("plan {0} already exists")]
    Duplicate(String),

    #[error("{0}")]
    Backend(String),
}

pub trait PlanTable: Send + Sync {
    fn find(&self, code: &PlanCode) -> Result<Option<PlanDocument>, StoreError>;

    /// Must fail with [`StoreError::Duplicate`] when `doc.code` is taken.
    fn insert(&self, doc: &PlanDocument) -> Result<(), StoreError>;
}

/// Check-then-insert with a server-assigned timestamp.
pub fn create_plan(
    table: &dyn PlanTable,
    code: PlanCode,
    rows: Vec<PlanRow>,
) -> Result<PlanDocument, StoreError> {
    if table.find(&code)?.is_some() {
        return Err(StoreError::Duplicate(code.to_string()));
    }
    let doc = PlanDocument {
        code,
        rows,
        updated_at: Utc::now(),
    };
    table.insert(&doc)?;
    info!(code = %doc.code, rows = doc.rows.len(), "plan created");
    Ok(doc)
}

pub struct SqlitePlanTable {
    conn: Mutex<Connection>,
}

impl SqlitePlanTable {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = db::open_plans_db(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_plans_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("plan table lock poisoned".to_string()))?;
        f(&conn)
    }
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl PlanTable for SqlitePlanTable {
    fn find(&self, code: &PlanCode) -> Result<Option<PlanDocument>, StoreError> {
        let row: Option<(String, String)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT rows, updated_at FROM plans WHERE code = ?",
                [code.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(backend)
        })?;
        let Some((rows_json, updated_at)) = row else {
            return Ok(None);
        };
        let rows: Vec<PlanRow> = serde_json::from_str(&rows_json).map_err(backend)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(backend)?
            .with_timezone(&Utc);
        Ok(Some(PlanDocument {
            code: code.clone(),
            rows,
            updated_at,
        }))
    }

    fn insert(&self, doc: &PlanDocument) -> Result<(), StoreError> {
        let rows_json = serde_json::to_string(&doc.rows).map_err(backend)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO plans(code, rows, updated_at) VALUES(?, ?, ?)",
                (doc.code.as_str(), &rows_json, doc.updated_at.to_rfc3339()),
            )
            .map(|_| ())
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                    warn!(code = %doc.code, "duplicate plan insert rejected by primary key");
                    StoreError::Duplicate(doc.code.to_string())
                }
                other => backend(other),
            })
        })
    }
}
