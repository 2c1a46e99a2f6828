use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::pki::crl::{
    CaConfig, CaId, CaRegistry, CaStatus, CertificateMutation, CertificateStore, CrlCommit,
    CrlDescriptor, CrlPorts, CrlStore, PersistenceError, PublisherId, PublisherQueue,
    PublisherQueueEntry, RevocationReason, RevokedCertificateRecord, SigningEngine, UnitOfWork,
};

type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Default)]
struct State {
    cas: BTreeMap<CaId, CaConfig>,
    certificates: HashMap<String, RevokedCertificateRecord>,
    crls: Vec<CrlDescriptor>,
    queue: Vec<PublisherQueueEntry>,
}

impl State {
    fn check_crl(&self, descriptor: &CrlDescriptor) -> Result<()> {
        if self
            .crls
            .iter()
            .any(|crl| crl.fingerprint == descriptor.fingerprint)
        {
            return Err(PersistenceError::Conflict(format!(
                "CRL {} already stored",
                descriptor.fingerprint
            )));
        }

        let highest = self
            .crls
            .iter()
            .filter(|crl| {
                crl.issuer_dn == descriptor.issuer_dn
                    && crl.partition_index == descriptor.partition_index
            })
            .map(|crl| crl.crl_number)
            .max();
        match highest {
            Some(highest) if descriptor.crl_number <= highest => {
                Err(PersistenceError::Conflict(format!(
                    "CRL number {} for {} partition {} is not above {}",
                    descriptor.crl_number,
                    descriptor.issuer_dn,
                    descriptor.partition_index,
                    highest
                )))
            }
            _ => Ok(()),
        }
    }

    fn certificate_mut(&mut self, fingerprint: &str) -> Result<&mut RevokedCertificateRecord> {
        self.certificates
            .get_mut(fingerprint)
            .ok_or_else(|| PersistenceError::NotFound(format!("certificate {fingerprint}")))
    }

    fn apply(&mut self, mutation: &CertificateMutation) -> Result<()> {
        match mutation {
            CertificateMutation::Archive { fingerprint } => {
                self.certificate_mut(fingerprint)?.archived = true;
            }
            CertificateMutation::SetRevocationDate { fingerprint, date } => {
                let record = self.certificate_mut(fingerprint)?;
                // A finalized date is never moved
                if record.revocation_date.is_none() {
                    record.revocation_date = Some(*date);
                }
            }
        }
        Ok(())
    }
}

/// An in-memory CA store implementing every CRL engine port.
///
/// Useful for testing and development. Commits are atomic: a unit is
/// validated and applied under one write lock.
#[derive(Debug, Default, Clone)]
pub struct MemoryCaStore {
    state: Arc<RwLock<State>>,
}

impl MemoryCaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire this store into the CRL engine together with a signing engine
    pub fn ports(&self, signer: Arc<dyn SigningEngine>) -> CrlPorts {
        let store = Arc::new(self.clone());
        CrlPorts {
            registry: store.clone(),
            certificates: store.clone(),
            crls: store.clone(),
            signer,
            unit_of_work: store,
        }
    }

    /// Insert or replace a CA configuration
    pub async fn add_ca(&self, ca: CaConfig) {
        debug!("Registering CA {} ({})", ca.ca_id, ca.issuer_dn);
        self.state.write().await.cas.insert(ca.ca_id, ca);
    }

    pub async fn set_ca_status(&self, ca_id: CaId, status: CaStatus) -> Result<()> {
        self.state
            .write()
            .await
            .cas
            .get_mut(&ca_id)
            .map(|ca| ca.status = status)
            .ok_or_else(|| PersistenceError::NotFound(format!("CA {ca_id}")))
    }

    /// Insert or replace a certificate record, keyed by fingerprint
    pub async fn add_certificate(&self, record: RevokedCertificateRecord) {
        self.state
            .write()
            .await
            .certificates
            .insert(record.fingerprint.clone(), record);
    }

    /// Revoke a stored certificate. `None` leaves the date to the next CRL
    pub async fn revoke(
        &self,
        fingerprint: &str,
        date: Option<DateTime<Utc>>,
        reason: RevocationReason,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.certificate_mut(fingerprint)?;
        record.revocation_date = date;
        record.revocation_reason = reason;
        Ok(())
    }

    pub async fn certificate(&self, fingerprint: &str) -> Option<RevokedCertificateRecord> {
        self.state.read().await.certificates.get(fingerprint).cloned()
    }

    /// Every stored CRL in insertion order
    pub async fn crls(&self) -> Vec<CrlDescriptor> {
        self.state.read().await.crls.clone()
    }

    /// Pending publisher queue entries in insertion order
    pub async fn queue_entries(&self) -> Vec<PublisherQueueEntry> {
        self.state.read().await.queue.clone()
    }
}

#[async_trait]
impl CaRegistry for MemoryCaStore {
    async fn list_ca_ids(&self) -> Result<Vec<CaId>> {
        Ok(self.state.read().await.cas.keys().copied().collect())
    }

    async fn get_ca(&self, ca_id: CaId) -> Result<Option<CaConfig>> {
        Ok(self.state.read().await.cas.get(&ca_id).cloned())
    }
}

#[async_trait]
impl CertificateStore for MemoryCaStore {
    async fn list_revoked(
        &self,
        issuer_dn: &str,
        partition_index: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RevokedCertificateRecord>> {
        let state = self.state.read().await;
        Ok(state
            .certificates
            .values()
            .filter(|c| {
                c.issuer_dn == issuer_dn && c.partition_index == partition_index && !c.archived
            })
            .filter(|c| match (since, c.revocation_date) {
                (Some(since), Some(revoked_at)) => revoked_at > since,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn archive(&self, fingerprint: &str) -> Result<()> {
        self.state
            .write()
            .await
            .apply(&CertificateMutation::Archive {
                fingerprint: fingerprint.to_string(),
            })
    }

    async fn set_revocation_date(&self, fingerprint: &str, date: DateTime<Utc>) -> Result<()> {
        self.state
            .write()
            .await
            .apply(&CertificateMutation::SetRevocationDate {
                fingerprint: fingerprint.to_string(),
                date,
            })
    }
}

#[async_trait]
impl CrlStore for MemoryCaStore {
    async fn get_last_crl(
        &self,
        issuer_dn: &str,
        partition_index: u32,
        is_delta: bool,
    ) -> Result<Option<CrlDescriptor>> {
        let state = self.state.read().await;
        Ok(state
            .crls
            .iter()
            .filter(|crl| {
                crl.issuer_dn == issuer_dn
                    && crl.partition_index == partition_index
                    && crl.is_delta == is_delta
            })
            .max_by_key(|crl| crl.crl_number)
            .cloned())
    }

    async fn store_crl(&self, descriptor: &CrlDescriptor) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_crl(descriptor)?;
        state.crls.push(descriptor.clone());
        Ok(())
    }

    async fn remove_crl(&self, fingerprint: &str) -> Result<()> {
        self.state
            .write()
            .await
            .crls
            .retain(|crl| crl.fingerprint != fingerprint);
        Ok(())
    }
}

#[async_trait]
impl PublisherQueue for MemoryCaStore {
    async fn enqueue(&self, entry: &PublisherQueueEntry) -> Result<()> {
        self.state.write().await.queue.push(entry.clone());
        Ok(())
    }

    async fn remove(&self, publisher_id: PublisherId, fingerprint: &str) -> Result<()> {
        self.state
            .write()
            .await
            .queue
            .retain(|e| !(e.publisher_id == publisher_id && e.fingerprint == fingerprint));
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryCaStore {
    async fn commit(&self, commit: CrlCommit) -> Result<()> {
        let mut state = self.state.write().await;

        state.check_crl(&commit.descriptor)?;
        if let Some(missing) = commit
            .mutations
            .iter()
            .find(|m| !state.certificates.contains_key(m.fingerprint()))
        {
            return Err(PersistenceError::NotFound(format!(
                "certificate {}",
                missing.fingerprint()
            )));
        }

        for mutation in &commit.mutations {
            state.apply(mutation)?;
        }
        state.crls.push(commit.descriptor);
        state.queue.extend(commit.queue_entries);
        Ok(())
    }
}
