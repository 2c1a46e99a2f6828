//! Certificate Revocation List (CRL) issuance
//!
//! This module decides when base and delta CRLs are due for each CA and
//! partition, builds their content, numbers and signs them, and hands the
//! result to publishers.
//!
//! # Features
//! - Base and delta CRL scheduling with overlap and issue intervals
//! - Partitioned CRLs with per-partition distribution points
//! - Strictly increasing CRL numbers per issuer partition
//! - Atomic commit of the CRL, certificate mutations and publisher queue entries

mod content;
mod errors;
pub mod generator;
pub mod parser;
pub mod partition;
pub mod ports;
mod publisher;
pub mod scheduler;
pub mod signer;
mod types;

// Re-export public types
pub use content::{ContentScope, CrlContent, CrlContentBuilder, plan_content};
pub use errors::{CrlError, CrlResult, PersistenceError, SigningEngineError};
pub use generator::{CrlGenerator, CrlPorts};
pub use parser::CrlInfo;
pub use partition::{PartitionUris, derive_extensions};
pub use ports::{
    CaRegistry, CertificateStore, CrlCommit, CrlExtensions, CrlSigningRequest, CrlStore,
    PublisherQueue, RevokedEntry, SigningEngine, UnitOfWork,
};
pub use publisher::PublisherEnqueuer;
pub use scheduler::{CrlScheduler, CrlSchedulerConfig};
pub use signer::SoftwareCrlSigner;
pub use types::{
    ArtifactType, CaConfig, CaId, CaStatus, CertificateMutation, CrlDescriptor,
    NO_CRL_PARTITION, PublisherId, PublisherQueueEntry, RevocationReason,
    RevokedCertificateRecord,
};
