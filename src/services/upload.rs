//! Accepting an uploaded CSV: validate it, store it on the configured disk and queue the
//! import job.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use tracing::{info, warn};
use uuid::Uuid;

use super::storage::StorageRegistry;
use crate::types::{ImportCollaboratorsRequest, ImportSubmitResponse, QueuedImportJob};

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 2] = ["csv", "txt"];
const UPLOAD_DIR: &str = "imports";
const ACCEPTED_MESSAGE: &str = "Processing started successfully.";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("The file field is required.")]
    MissingFile,

    #[error("The file field must be a file of type: csv, txt.")]
    InvalidType,

    #[error("The file field must not be greater than {} kilobytes.", max / 1024)]
    TooLarge { max: usize },

    #[error("The file content is not valid base64.")]
    InvalidEncoding,

    #[error("The file could not be stored: {0}")]
    Store(anyhow::Error),

    #[error("The import could not be queued: {0}")]
    Enqueue(anyhow::Error),
}

impl UploadError {
    /// Problems with the upload itself, reported against the `file` field
    pub fn is_validation(&self) -> bool {
        !matches!(self, UploadError::Store(_) | UploadError::Enqueue(_))
    }
}

/// Destination of queued import jobs
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &QueuedImportJob) -> Result<()>;
}

pub struct UploadHandoff {
    disks: StorageRegistry,
    disk_name: String,
    queue: Arc<dyn JobQueue>,
}

impl UploadHandoff {
    pub fn new(disks: StorageRegistry, disk_name: impl Into<String>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            disks,
            disk_name: disk_name.into(),
            queue,
        }
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        request: &ImportCollaboratorsRequest,
    ) -> Result<ImportSubmitResponse, UploadError> {
        let contents = decode_upload(request)?;

        let disk = self
            .disks
            .disk(&self.disk_name)
            .ok_or_else(|| UploadError::Store(anyhow::anyhow!("unknown storage disk: {}", self.disk_name)))?;
        let path = format!("{}/{}.csv", UPLOAD_DIR, Uuid::new_v4());
        disk.put(&path, &contents).await.map_err(UploadError::Store)?;

        let job = QueuedImportJob::new(user_id, path.clone(), self.disk_name.clone());
        if let Err(e) = self.queue.enqueue(&job).await {
            if let Err(cleanup) = disk.delete(&path).await {
                warn!(path = %path, "Could not remove unqueued upload: {:#}", cleanup);
            }
            return Err(UploadError::Enqueue(e));
        }

        info!(
            job_id = %job.id,
            user_id = %user_id,
            path = %path,
            bytes = contents.len(),
            "Collaborators import queued"
        );
        Ok(ImportSubmitResponse {
            job_id: job.id,
            message: ACCEPTED_MESSAGE.to_string(),
        })
    }
}

fn decode_upload(request: &ImportCollaboratorsRequest) -> Result<Vec<u8>, UploadError> {
    let encoded = request.content_base64.trim();
    if request.file_name.trim().is_empty() || encoded.is_empty() {
        return Err(UploadError::MissingFile);
    }

    let extension = Path::new(request.file_name.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    if !extension.is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str())) {
        return Err(UploadError::InvalidType);
    }

    // Reject oversized payloads before decoding them
    if encoded.len() / 4 * 3 > MAX_UPLOAD_BYTES + 3 {
        return Err(UploadError::TooLarge { max: MAX_UPLOAD_BYTES });
    }

    let contents = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| UploadError::InvalidEncoding)?;
    if contents.is_empty() {
        return Err(UploadError::MissingFile);
    }
    if contents.len() > MAX_UPLOAD_BYTES {
        return Err(UploadError::TooLarge { max: MAX_UPLOAD_BYTES });
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryDisk;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        jobs: Mutex<Vec<QueuedImportJob>>,
        fail: bool,
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn enqueue(&self, job: &QueuedImportJob) -> Result<()> {
            if self.fail {
                anyhow::bail!("stream unavailable");
            }
            self.jobs.lock().push(job.clone());
            Ok(())
        }
    }

    fn request(file_name: &str, contents: &[u8]) -> ImportCollaboratorsRequest {
        ImportCollaboratorsRequest {
            file_name: file_name.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(contents),
        }
    }

    fn handoff(queue: Arc<RecordingQueue>) -> (UploadHandoff, Arc<MemoryDisk>) {
        let disk = Arc::new(MemoryDisk::new());
        let disks = StorageRegistry::new().with_disk("local", disk.clone());
        (UploadHandoff::new(disks, "local", queue), disk)
    }

    #[tokio::test]
    async fn test_submit_stores_file_and_queues_job() {
        let queue = Arc::new(RecordingQueue::default());
        let (handoff, disk) = handoff(queue.clone());
        let owner = Uuid::new_v4();

        let response = handoff
            .submit(owner, &request("colaboradores.CSV", b"name,email,cpf,city,state\n"))
            .await
            .unwrap();

        assert_eq!(response.message, "Processing started successfully.");
        let jobs = queue.jobs.lock().clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, response.job_id);
        assert_eq!(jobs[0].user_id, owner);
        assert_eq!(jobs[0].disk, "local");
        assert!(jobs[0].path.starts_with("imports/"));
        assert!(jobs[0].path.ends_with(".csv"));
        assert_eq!(
            disk.read(&jobs[0].path).unwrap(),
            b"name,email,cpf,city,state\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_enqueue_failure_removes_stored_file() {
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..Default::default()
        });
        let (handoff, disk) = handoff(queue);

        let err = handoff
            .submit(Uuid::new_v4(), &request("a.csv", b"name\n"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Enqueue(_)));
        assert!(!err.is_validation());
        assert!(disk.paths().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_queue() {
        let queue = Arc::new(RecordingQueue::default());
        let (handoff, disk) = handoff(queue.clone());
        disk.fail_puts(true);

        let err = handoff
            .submit(Uuid::new_v4(), &request("a.csv", b"name\n"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Store(_)));
        assert!(queue.jobs.lock().is_empty());
    }

    #[test]
    fn test_rejects_invalid_uploads() {
        assert!(matches!(
            decode_upload(&request("a.csv", b"")),
            Err(UploadError::MissingFile)
        ));
        assert!(matches!(
            decode_upload(&request("a.xlsx", b"data")),
            Err(UploadError::InvalidType)
        ));
        assert!(matches!(
            decode_upload(&request("csv", b"data")),
            Err(UploadError::InvalidType)
        ));
        assert!(matches!(
            decode_upload(&ImportCollaboratorsRequest {
                file_name: "a.txt".into(),
                content_base64: "***".into(),
            }),
            Err(UploadError::InvalidEncoding)
        ));
        assert!(decode_upload(&request("lista.txt", b"name\n")).is_ok());
    }

    #[test]
    fn test_rejects_oversized_upload() {
        let big = vec![b'a'; MAX_UPLOAD_BYTES + 1];
        let err = decode_upload(&request("a.csv", &big)).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { max } if max == MAX_UPLOAD_BYTES));
        assert!(err.is_validation());

        let exact = vec![b'a'; MAX_UPLOAD_BYTES];
        assert!(decode_upload(&request("a.csv", &exact)).is_ok());
    }
}
