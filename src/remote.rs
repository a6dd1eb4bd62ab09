use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::plan::{PlanCode, PlanDocument, PlanRow};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("plan {0} already exists")]
    Conflict(String),

    #[error("plan store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("plan store unreachable: {0}")]
    Transport(String),

    #[error("unexpected plan store response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct Created {
    data: PlanDocument,
}

pub struct PlanStoreClient {
    base_url: String,
    http: Client,
}

impl PlanStoreClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let http = Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// `Ok(None)` when the store has no plan under `code`.
    pub fn fetch(&self, code: &PlanCode) -> Result<Option<PlanDocument>, RemoteError> {
        let url = format!("{}/plans/{}", self.base_url, code);
        debug!(%url, "fetching plan");
        let resp = self.http.get(&url).send()?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json::<PlanDocument>()?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(rejected(resp)),
        }
    }

    pub fn create(&self, code: &PlanCode, rows: &[PlanRow]) -> Result<PlanDocument, RemoteError> {
        let url = format!("{}/plans", self.base_url);
        debug!(%url, %code, rows = rows.len(), "publishing plan");
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "code": code, "rows": rows }))
            .send()?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json::<Created>()?.data),
            StatusCode::CONFLICT => Err(RemoteError::Conflict(code.to_string())),
            _ => Err(rejected(resp)),
        }
    }
}

fn rejected(resp: Response) -> RemoteError {
    let status = resp.status().as_u16();
    let message = resp
        .json::<Value>()
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| "no error message".to_string());
    warn!(status, %message, "plan store rejected request");
    RemoteError::Rejected { status, message }
}
