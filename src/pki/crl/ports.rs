//! Interfaces the CRL engine requires from the rest of the CA.
//!
//! Implementations are wired into [`CrlGenerator`](super::CrlGenerator) and
//! [`CrlScheduler`](super::CrlScheduler) explicitly as `Arc<dyn …>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::{PersistenceError, SigningEngineError};
use super::types::{
    CaConfig, CaId, CertificateMutation, CrlDescriptor, PublisherId, PublisherQueueEntry,
    RevocationReason, RevokedCertificateRecord,
};

/// Source of per-CA configuration and status
#[async_trait]
pub trait CaRegistry: Send + Sync {
    /// Ids of every CA known to the registry.
    async fn list_ca_ids(&self) -> Result<Vec<CaId>, PersistenceError>;

    async fn get_ca(&self, ca_id: CaId) -> Result<Option<CaConfig>, PersistenceError>;
}

/// Revoked certificate records per issuer and partition
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// List revoked certificates of one issuer partition.
    ///
    /// With `since` set, only records revoked after that instant are returned,
    /// together with every record whose revocation date is still unset.
    async fn list_revoked(
        &self,
        issuer_dn: &str,
        partition_index: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RevokedCertificateRecord>, PersistenceError>;

    /// Idempotent.
    async fn archive(&self, fingerprint: &str) -> Result<(), PersistenceError>;

    /// Idempotent.
    async fn set_revocation_date(
        &self,
        fingerprint: &str,
        date: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

/// Persistence of generated CRLs
#[async_trait]
pub trait CrlStore: Send + Sync {
    /// Most recent CRL of the (issuer, partition, kind) sequence.
    async fn get_last_crl(
        &self,
        issuer_dn: &str,
        partition_index: u32,
        is_delta: bool,
    ) -> Result<Option<CrlDescriptor>, PersistenceError>;

    /// Store a new CRL.
    ///
    /// Fails with [`PersistenceError::Conflict`] when the CRL number is not above
    /// every number already stored for the same issuer partition.
    async fn store_crl(&self, descriptor: &CrlDescriptor) -> Result<(), PersistenceError>;

    /// Remove an orphaned CRL during compensating cleanup.
    async fn remove_crl(&self, fingerprint: &str) -> Result<(), PersistenceError>;
}

/// One entry of a CRL under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial_number: Vec<u8>,
    pub revocation_date: DateTime<Utc>,
    pub reason: RevocationReason,
}

/// Extension values a CRL must carry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrlExtensions {
    /// Full-name URIs of the Issuing Distribution Point, omitted when empty
    pub issuing_distribution_point: Vec<String>,
    pub issuing_distribution_point_critical: bool,
    /// Freshest CRL URIs, omitted when empty
    pub freshest_crl: Vec<String>,
}

/// Everything the signing engine needs to produce one CRL
#[derive(Debug, Clone)]
pub struct CrlSigningRequest {
    pub ca_id: CaId,
    pub issuer_dn: String,
    pub entries: Vec<RevokedEntry>,
    pub crl_number: u64,
    /// Set for delta CRLs, carried in the Delta CRL Indicator
    pub base_crl_number: Option<u64>,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub extensions: CrlExtensions,
}

impl CrlSigningRequest {
    pub fn is_delta(&self) -> bool {
        self.base_crl_number.is_some()
    }
}

/// The CA token that signs CRLs.
///
/// A call may block on an HSM for seconds and is either completed or not started.
#[async_trait]
pub trait SigningEngine: Send + Sync {
    /// Build and sign the CRL, returning its DER encoding.
    async fn sign(&self, request: CrlSigningRequest) -> Result<Vec<u8>, SigningEngineError>;
}

/// Durable hand-off of artifacts to external publishers
#[async_trait]
pub trait PublisherQueue: Send + Sync {
    async fn enqueue(&self, entry: &PublisherQueueEntry) -> Result<(), PersistenceError>;

    /// Drop a pending entry, used when the artifact it points to is rolled back.
    async fn remove(
        &self,
        publisher_id: PublisherId,
        fingerprint: &str,
    ) -> Result<(), PersistenceError>;
}

/// Everything that becomes visible when one CRL is issued
#[derive(Debug, Clone)]
pub struct CrlCommit {
    pub descriptor: CrlDescriptor,
    pub mutations: Vec<CertificateMutation>,
    pub queue_entries: Vec<PublisherQueueEntry>,
}

/// Commits a generated CRL with its side effects, all or nothing
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, commit: CrlCommit) -> Result<(), PersistenceError>;
}
