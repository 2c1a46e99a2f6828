use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::PersistenceError;
use super::ports::PublisherQueue;
use super::types::{ArtifactType, PublisherId, PublisherQueueEntry};

/// Hands generated artifacts to the publisher queue
#[derive(Clone)]
pub struct PublisherEnqueuer {
    queue: Arc<dyn PublisherQueue>,
}

impl PublisherEnqueuer {
    pub fn new(queue: Arc<dyn PublisherQueue>) -> Self {
        Self { queue }
    }

    /// Build one queue entry per distinct publisher, in configuration order
    pub fn plan(
        fingerprint: &str,
        artifact_type: ArtifactType,
        publisher_ids: &[PublisherId],
    ) -> Vec<PublisherQueueEntry> {
        let mut seen = HashSet::new();
        let created_at = Utc::now();

        publisher_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|&publisher_id| PublisherQueueEntry {
                id: Uuid::new_v4(),
                publisher_id,
                fingerprint: fingerprint.to_string(),
                artifact_type,
                created_at,
            })
            .collect()
    }

    /// Enqueue an artifact for every configured publisher.
    ///
    /// CRLs go through the unit of work instead, this path serves certificates
    /// published under their profile's publisher list.
    pub async fn enqueue(
        &self,
        fingerprint: &str,
        artifact_type: ArtifactType,
        publisher_ids: &[PublisherId],
    ) -> Result<usize, PersistenceError> {
        let entries = Self::plan(fingerprint, artifact_type, publisher_ids);
        if entries.is_empty() {
            debug!("No publishers configured for {}", fingerprint);
            return Ok(0);
        }

        for entry in &entries {
            if let Err(e) = self.queue.enqueue(entry).await {
                warn!(
                    "Failed to enqueue {} for publisher {}: {}",
                    fingerprint, entry.publisher_id, e
                );
                return Err(e);
            }
        }

        debug!(
            "Enqueued {} for {} publishers",
            fingerprint,
            entries.len()
        );
        Ok(entries.len())
    }
}
