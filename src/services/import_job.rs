//! Execution of one queued collaborator import.
//!
//! `ImportJobRunner::execute` runs a single delivery attempt and says what the queue
//! should do next. The queue redelivers the same job on retry; every attempt re-resolves
//! the owner and reopens the file.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use super::cache::CollaboratorsCache;
use super::email_templates::{ImportFailedEmail, ImportedEmail, IMPORT_FAILED_MESSAGE};
use super::importer::CsvImporter;
use super::mail_queue::MailQueue;
use super::storage::StorageRegistry;
use super::store::UserDirectory;
use crate::types::{ImportResult, QueuedImportJob};

/// Delays between attempts; the number of attempts is one more than the delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(5),
            Duration::from_secs(15),
            Duration::from_secs(30),
        ])
    }
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    pub fn max_attempts(&self) -> u32 {
        self.backoff.len() as u32 + 1
    }

    /// Delay before the next attempt when `attempt` (1-based) failed, or `None` when it
    /// was the last one
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        let index = attempt.checked_sub(1)? as usize;
        self.backoff.get(index).copied()
    }
}

/// What happened to one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Done(ImportResult),
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

pub struct ImportJobRunner {
    importer: Arc<CsvImporter>,
    users: Arc<dyn UserDirectory>,
    cache: Arc<CollaboratorsCache>,
    mail: MailQueue,
    disks: StorageRegistry,
    retry: RetryPolicy,
}

impl ImportJobRunner {
    pub fn new(
        importer: Arc<CsvImporter>,
        users: Arc<dyn UserDirectory>,
        cache: Arc<CollaboratorsCache>,
        mail: MailQueue,
        disks: StorageRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            importer,
            users,
            cache,
            mail,
            disks,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run attempt number `attempt` (1-based) of the job
    pub async fn execute(&self, job: &QueuedImportJob, attempt: u32) -> Disposition {
        match self.handle(job).await {
            Ok(result) => Disposition::Done(result),
            Err(e) => {
                let message = format!("{:#}", e);
                match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        warn!(
                            job_id = %job.id,
                            user_id = %job.user_id,
                            attempt,
                            retry_in_secs = delay.as_secs(),
                            "Collaborators import attempt failed: {}",
                            message
                        );
                        Disposition::Retry {
                            delay,
                            error: message,
                        }
                    }
                    None => {
                        self.failed(job, &e).await;
                        Disposition::Failed { error: message }
                    }
                }
            }
        }
    }

    /// Import, then flush the owner's cache, queue the summary mail and delete the file
    pub async fn handle(&self, job: &QueuedImportJob) -> Result<ImportResult> {
        let user = self
            .users
            .find(job.user_id)
            .await?
            .ok_or_else(|| anyhow!("user {} not found", job.user_id))?;

        let result = self.importer.import(user.id, &job.path, &job.disk).await?;

        self.cache.flush_for_user(user.id);
        self.mail.queue(
            ImportedEmail {
                to: &user.email,
                result,
            }
            .render(),
        );
        self.delete_file(job).await?;

        info!(
            job_id = %job.id,
            user_id = %user.id,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            "Collaborators import completed"
        );
        Ok(result)
    }

    /// Terminal failure: tell the owner, log, and remove the file
    pub async fn failed(&self, job: &QueuedImportJob, cause: &anyhow::Error) {
        match self.users.find(job.user_id).await {
            Ok(Some(user)) => self.mail.queue(
                ImportFailedEmail {
                    to: &user.email,
                    file_name: job.file_name(),
                    error_message: IMPORT_FAILED_MESSAGE,
                }
                .render(),
            ),
            Ok(None) => {}
            Err(e) => warn!(user_id = %job.user_id, "Owner lookup failed, no failure mail: {:#}", e),
        }

        error!(
            job_id = %job.id,
            user_id = %job.user_id,
            path = %job.path,
            disk = %job.disk,
            error = %format!("{:#}", cause),
            "Collaborators import failed"
        );

        if let Err(e) = self.delete_file(job).await {
            warn!(path = %job.path, disk = %job.disk, "Could not delete import file: {:#}", e);
        }
    }

    async fn delete_file(&self, job: &QueuedImportJob) -> Result<()> {
        let disk = self
            .disks
            .disk(&job.disk)
            .ok_or_else(|| anyhow!("unknown storage disk: {}", job.disk))?;
        disk.delete(&job.path).await
    }
}
