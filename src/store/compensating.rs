use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::pki::crl::{
    CertificateMutation, CertificateStore, CrlCommit, CrlDescriptor, CrlStore, PersistenceError,
    PublisherQueue, PublisherQueueEntry, UnitOfWork,
};

/// Unit of work over stores without a shared transaction.
///
/// Steps run as descriptor, then mutations, then queue entries. When a later
/// step fails the queued entries and the descriptor are removed again.
/// Applied mutations are kept: archiving and finalizing a revocation date are
/// idempotent and are planned again by the next CRL.
pub struct CompensatingUnitOfWork {
    crls: Arc<dyn CrlStore>,
    certificates: Arc<dyn CertificateStore>,
    queue: Arc<dyn PublisherQueue>,
}

impl CompensatingUnitOfWork {
    pub fn new(
        crls: Arc<dyn CrlStore>,
        certificates: Arc<dyn CertificateStore>,
        queue: Arc<dyn PublisherQueue>,
    ) -> Self {
        Self {
            crls,
            certificates,
            queue,
        }
    }

    async fn apply(&self, mutation: &CertificateMutation) -> Result<(), PersistenceError> {
        match mutation {
            CertificateMutation::Archive { fingerprint } => {
                self.certificates.archive(fingerprint).await
            }
            CertificateMutation::SetRevocationDate { fingerprint, date } => {
                self.certificates
                    .set_revocation_date(fingerprint, *date)
                    .await
            }
        }
    }

    async fn roll_back(&self, descriptor: &CrlDescriptor, enqueued: &[&PublisherQueueEntry]) {
        for entry in enqueued {
            if let Err(e) = self
                .queue
                .remove(entry.publisher_id, &entry.fingerprint)
                .await
            {
                error!(
                    "Failed to remove queue entry {} for publisher {}: {}",
                    entry.id, entry.publisher_id, e
                );
            }
        }
        if let Err(e) = self.crls.remove_crl(&descriptor.fingerprint).await {
            error!(
                "Failed to remove orphaned CRL #{} ({}): {}",
                descriptor.crl_number, descriptor.fingerprint, e
            );
        }
    }
}

#[async_trait]
impl UnitOfWork for CompensatingUnitOfWork {
    async fn commit(&self, commit: CrlCommit) -> Result<(), PersistenceError> {
        let CrlCommit {
            descriptor,
            mutations,
            queue_entries,
        } = commit;

        self.crls.store_crl(&descriptor).await?;

        for mutation in &mutations {
            if let Err(e) = self.apply(mutation).await {
                warn!(
                    "Rolling back CRL #{}: mutation of {} failed: {}",
                    descriptor.crl_number,
                    mutation.fingerprint(),
                    e
                );
                self.roll_back(&descriptor, &[]).await;
                return Err(e);
            }
        }

        let mut enqueued = Vec::with_capacity(queue_entries.len());
        for entry in &queue_entries {
            if let Err(e) = self.queue.enqueue(entry).await {
                warn!(
                    "Rolling back CRL #{}: enqueue for publisher {} failed: {}",
                    descriptor.crl_number, entry.publisher_id, e
                );
                self.roll_back(&descriptor, &enqueued).await;
                return Err(e);
            }
            enqueued.push(entry);
        }
        Ok(())
    }
}
