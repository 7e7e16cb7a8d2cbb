//! Collaborator CSV import types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome counters of one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
}

impl ImportResult {
    /// Rows that were persisted; skipped rows are not counted
    pub fn total(&self) -> u32 {
        self.created + self.updated
    }
}

/// Queued import unit of work.
///
/// Carries only identifiers; storage handles and connections are resolved again by the
/// worker that picks the job up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub path: String,
    pub disk: String,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedImportJob {
    pub fn new(user_id: Uuid, path: impl Into<String>, disk: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            path: path.into(),
            disk: disk.into(),
            submitted_at: Utc::now(),
        }
    }

    /// Last path segment of the stored upload
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Upload of a CSV file to import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCollaboratorsRequest {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub content_base64: String,
}

/// Acknowledgement returned once the upload is stored and queued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Status of an import job, published while it moves through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportJobStatus {
    Queued,
    #[serde(rename_all = "camelCase")]
    Processing { attempt: u32 },
    #[serde(rename_all = "camelCase")]
    Retrying {
        attempt: u32,
        retry_in_secs: u64,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        created: u32,
        updated: u32,
        skipped: u32,
        total: u32,
    },
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

impl From<ImportResult> for ImportJobStatus {
    fn from(result: ImportResult) -> Self {
        ImportJobStatus::Completed {
            created: result.created,
            updated: result.updated,
            skipped: result.skipped,
            total: result.total(),
        }
    }
}

/// Status update message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}
