//! Collaborator import JetStream processor
//!
//! Queues uploaded files as durable jobs and runs them with redelivery as the retry
//! mechanism:
//! - the delivery count of a message is the attempt number
//! - a failed attempt is negatively acknowledged with the backoff delay
//! - the last failed attempt runs the failure path and terminates the message
//! - a running attempt sends progress acks so `ack_wait` never expires under it
//!
//! ## Streams
//! - `COLLABORATORS_IMPORT_JOBS` - collaborator CSV imports

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, AckKind, Context as JsContext};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::import_job::{Disposition, ImportJobRunner};
use super::upload::JobQueue;
use crate::types::{ImportJobStatus, ImportJobStatusUpdate, QueuedImportJob};

// Stream and consumer names
const STREAM_NAME: &str = "COLLABORATORS_IMPORT_JOBS";
const CONSUMER_NAME: &str = "import_workers";
const SUBJECT: &str = "collab.jobs.import";
const STATUS_PREFIX: &str = "collab.job.import.status";

/// Import job processor with JetStream integration
pub struct ImportProcessor {
    client: Client,
    js: JsContext,
    runner: Arc<ImportJobRunner>,
    concurrency: usize,
    ack_wait: Duration,
}

impl ImportProcessor {
    /// Create the processor, initializing the JetStream stream
    pub async fn new(
        client: Client,
        runner: Arc<ImportJobRunner>,
        concurrency: usize,
        ack_wait: Duration,
    ) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 10_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self {
            client,
            js,
            runner,
            concurrency: concurrency.max(1),
            ack_wait,
        })
    }

    /// Publish a status update; delivery is not guaranteed
    pub async fn publish_status(&self, job_id: Uuid, status: ImportJobStatus) {
        let update = ImportJobStatusUpdate::new(job_id, status);
        let subject = status_subject(job_id);
        let result = match serde_json::to_vec(&update) {
            Ok(payload) => self
                .client
                .publish(subject, payload.into())
                .await
                .map_err(|e| anyhow!(e)),
            Err(e) => Err(anyhow!(e)),
        };
        if let Err(e) = result {
            warn!("Failed to publish status for import job {}: {}", job_id, e);
        }
    }

    /// Consume jobs until the subscription ends
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;
        let consumer_config = consumer_config(self.ack_wait, self.runner.retry_policy().max_attempts());

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!(
            "JetStream import consumer '{}' ready ({} parallel jobs)",
            CONSUMER_NAME, self.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    let permit = Arc::clone(&permits).acquire_owned().await?;
                    let processor = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = processor.process_job(msg).await {
                            error!("Failed to process import job: {}", e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Error receiving import message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Run one delivery of a job and settle the message
    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let attempt = msg
            .info()
            .map(|info| info.delivered.max(1) as u32)
            .unwrap_or(1);

        let job: QueuedImportJob = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                error!("Discarding undecodable import job: {}", e);
                msg.ack_with(AckKind::Term).await.map_err(|e| anyhow!(e))?;
                return Ok(());
            }
        };

        let start_time = Instant::now();
        info!("Processing import job {} (attempt {})", job.id, attempt);
        self.publish_status(job.id, ImportJobStatus::Processing { attempt }).await;

        let execution = self.runner.execute(&job, attempt);
        tokio::pin!(execution);
        let mut heartbeat = tokio::time::interval(progress_interval(self.ack_wait));
        heartbeat.tick().await;
        let disposition = loop {
            tokio::select! {
                disposition = &mut execution => break disposition,
                _ = heartbeat.tick() => {
                    if let Err(e) = msg.ack_with(AckKind::Progress).await {
                        warn!("Failed to extend ack deadline of import job {}: {:?}", job.id, e);
                    }
                }
            }
        };

        let (status, ack) = match disposition {
            Disposition::Done(result) => {
                info!(
                    "Import job {} completed in {}ms",
                    job.id,
                    start_time.elapsed().as_millis()
                );
                (ImportJobStatus::from(result), AckKind::Ack)
            }
            Disposition::Retry { delay, error } => (
                ImportJobStatus::Retrying {
                    attempt,
                    retry_in_secs: delay.as_secs(),
                    error,
                },
                AckKind::Nak(Some(delay)),
            ),
            Disposition::Failed { error } => (ImportJobStatus::Failed { error }, AckKind::Term),
        };

        self.publish_status(job.id, status).await;
        if let Err(e) = msg.ack_with(ack).await {
            error!("Failed to settle import job {}: {:?}", job.id, e);
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for ImportProcessor {
    async fn enqueue(&self, job: &QueuedImportJob) -> Result<()> {
        let payload = serde_json::to_vec(job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!("Import job {} submitted for user {}", job.id, job.user_id);
        self.publish_status(job.id, ImportJobStatus::Queued).await;
        Ok(())
    }
}

/// Durable consumer of the import stream.
///
/// Must not set `backoff`, which overrides `ack_wait` on the server. Retry delays travel
/// on the negative acknowledgement.
fn consumer_config(ack_wait: Duration, max_attempts: u32) -> jetstream::consumer::pull::Config {
    jetstream::consumer::pull::Config {
        durable_name: Some(CONSUMER_NAME.to_string()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait,
        max_deliver: i64::from(max_attempts),
        filter_subject: SUBJECT.to_string(),
        ..Default::default()
    }
}

/// Progress acks are sent twice per ack window
fn progress_interval(ack_wait: Duration) -> Duration {
    (ack_wait / 2).max(Duration::from_secs(1))
}

fn status_subject(job_id: Uuid) -> String {
    format!("{}.{}", STATUS_PREFIX, job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import_job::RetryPolicy;

    #[test]
    fn test_status_subject() {
        let id = Uuid::nil();
        assert_eq!(
            status_subject(id),
            "collab.job.import.status.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_consumer_keeps_ack_wait_and_has_no_backoff() {
        let config = consumer_config(Duration::from_secs(900), RetryPolicy::default().max_attempts());

        assert_eq!(config.ack_wait, Duration::from_secs(900));
        assert!(config.backoff.is_empty());
        assert_eq!(config.max_deliver, 4);
        assert_eq!(config.durable_name.as_deref(), Some(CONSUMER_NAME));
        assert_eq!(config.filter_subject, SUBJECT);
    }

    #[test]
    fn test_progress_interval_stays_inside_ack_wait() {
        assert_eq!(progress_interval(Duration::from_secs(900)), Duration::from_secs(450));
        assert_eq!(progress_interval(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn test_job_payload_carries_only_identifiers() {
        let job = QueuedImportJob::new(Uuid::new_v4(), "imports/a.csv", "local");
        let payload = serde_json::to_value(&job).unwrap();

        let mut keys: Vec<&str> = payload.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["disk", "id", "path", "submittedAt", "userId"]);
    }
}
