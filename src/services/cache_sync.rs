//! Cross-worker invalidation of the collaborators cache.
//!
//! Every worker keeps its own `CollaboratorsCache`, while list requests and import jobs
//! are spread over all of them. Each local flush is published on
//! `collab.cache.flush.<user_id>` and every other worker drops the same owner's pages.

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::CollaboratorsCache;

const FLUSH_PREFIX: &str = "collab.cache.flush";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlushNotice {
    /// Worker that flushed first
    origin: Uuid,
}

pub struct CacheSync {
    client: Client,
    cache: Arc<CollaboratorsCache>,
    origin: Uuid,
}

impl CacheSync {
    pub fn new(client: Client, cache: Arc<CollaboratorsCache>) -> Self {
        Self {
            client,
            cache,
            origin: Uuid::new_v4(),
        }
    }

    /// Publish local flushes and apply remote ones until either side stops
    pub async fn run(self, flushes: UnboundedReceiver<Uuid>) -> Result<()> {
        let mut subscriber = self.client.subscribe(format!("{}.*", FLUSH_PREFIX)).await?;
        info!("Cache flushes shared as worker {}", self.origin);

        let publish = self.publish(flushes);
        tokio::pin!(publish);

        loop {
            tokio::select! {
                _ = &mut publish => {
                    warn!("Cache flush channel closed");
                    return Ok(());
                }
                msg = subscriber.next() => match msg {
                    Some(msg) => {
                        apply_flush(&self.cache, self.origin, msg.subject.as_str(), &msg.payload);
                    }
                    None => {
                        warn!("Cache flush subscription ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn publish(&self, mut flushes: UnboundedReceiver<Uuid>) {
        while let Some(user_id) = flushes.recv().await {
            let notice = FlushNotice { origin: self.origin };
            let result = match serde_json::to_vec(&notice) {
                Ok(payload) => self
                    .client
                    .publish(flush_subject(user_id), payload.into())
                    .await
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                warn!(user_id = %user_id, "Failed to share cache flush: {}", e);
            }
        }
    }
}

fn flush_subject(user_id: Uuid) -> String {
    format!("{}.{}", FLUSH_PREFIX, user_id)
}

/// Owner named by a flush subject
fn flushed_user(subject: &str) -> Option<Uuid> {
    subject
        .strip_prefix(FLUSH_PREFIX)?
        .strip_prefix('.')?
        .parse()
        .ok()
}

/// Apply a flush published by another worker. Returns whether the cache was flushed.
fn apply_flush(cache: &CollaboratorsCache, origin: Uuid, subject: &str, payload: &[u8]) -> bool {
    let Some(user_id) = flushed_user(subject) else {
        warn!(subject = %subject, "Ignoring cache flush for unknown subject");
        return false;
    };
    let notice: FlushNotice = match serde_json::from_slice(payload) {
        Ok(notice) => notice,
        Err(e) => {
            warn!(subject = %subject, "Ignoring undecodable cache flush: {}", e);
            return false;
        }
    };
    if notice.origin == origin {
        return false;
    }

    debug!(user_id = %user_id, origin = %notice.origin, "Applying shared cache flush");
    cache.flush_local(user_id);
    true
}
