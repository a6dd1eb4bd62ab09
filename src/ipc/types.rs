use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::TrackerConfig;
use crate::plan::PlanDocument;
use crate::tracker::ExamBook;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub book: ExamBook,
    pub plan_store_url: String,
    /// Last plan returned by `plans.fetch`; `plans.merge` picks rows from it.
    pub fetched_plan: Option<PlanDocument>,
}

impl AppState {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            book: ExamBook::default(),
            plan_store_url: config.plan_store_url,
            fetched_plan: None,
        }
    }
}
