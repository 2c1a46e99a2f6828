use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::crypto;

use super::content::CrlContentBuilder;
use super::errors::{CrlError, CrlResult};
use super::partition::derive_extensions;
use super::ports::{
    CaRegistry, CertificateStore, CrlCommit, CrlExtensions, CrlSigningRequest, CrlStore,
    SigningEngine, UnitOfWork,
};
use super::publisher::PublisherEnqueuer;
use super::types::{ArtifactType, CaConfig, CaId, CaStatus, CrlDescriptor};

/// Default bound on one signing call
pub const DEFAULT_SIGNING_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// The collaborators a CRL generator is wired with
#[derive(Clone)]
pub struct CrlPorts {
    pub registry: Arc<dyn CaRegistry>,
    pub certificates: Arc<dyn CertificateStore>,
    pub crls: Arc<dyn CrlStore>,
    pub signer: Arc<dyn SigningEngine>,
    pub unit_of_work: Arc<dyn UnitOfWork>,
}

type PartitionKey = (String, u32);

/// Numbers, signs and commits CRLs.
///
/// Generation for one (issuer, partition) is serialized, so two callers can
/// never read the same previous number and issue the same next one.
pub struct CrlGenerator {
    registry: Arc<dyn CaRegistry>,
    crls: Arc<dyn CrlStore>,
    content: CrlContentBuilder,
    signer: Arc<dyn SigningEngine>,
    unit_of_work: Arc<dyn UnitOfWork>,
    locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
    signing_timeout: StdDuration,
}

impl CrlGenerator {
    pub fn new(ports: CrlPorts) -> Self {
        Self {
            registry: ports.registry,
            crls: ports.crls,
            content: CrlContentBuilder::new(ports.certificates),
            signer: ports.signer,
            unit_of_work: ports.unit_of_work,
            locks: DashMap::new(),
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
        }
    }

    pub fn with_signing_timeout(mut self, signing_timeout: StdDuration) -> Self {
        self.signing_timeout = signing_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<dyn CaRegistry> {
        &self.registry
    }

    pub fn crl_store(&self) -> &Arc<dyn CrlStore> {
        &self.crls
    }

    /// Resolve a CA through the registry
    pub async fn resolve_ca(&self, ca_id: CaId) -> CrlResult<CaConfig> {
        self.registry
            .get_ca(ca_id)
            .await
            .map_err(CrlError::store(ca_id))?
            .ok_or(CrlError::CaNotFound { ca_id })
    }

    /// Generate a CRL for a CA looked up by id
    pub async fn generate_for(
        &self,
        ca_id: CaId,
        partition_index: u32,
        is_delta: bool,
    ) -> CrlResult<CrlDescriptor> {
        let ca = self.resolve_ca(ca_id).await?;
        self.generate(&ca, partition_index, is_delta).await
    }

    fn lock_for(&self, issuer_dn: &str, partition_index: u32) -> Arc<Mutex<()>> {
        self.locks
            .entry((issuer_dn.to_string(), partition_index))
            .or_default()
            .clone()
    }

    fn check(&self, ca: &CaConfig, is_delta: bool) -> CrlResult<()> {
        let ca_id = ca.ca_id;
        if ca.status == CaStatus::Offline {
            return Err(CrlError::TokenOffline { ca_id });
        }
        ca.check_periods()
            .map_err(|reason| CrlError::InvalidConfiguration { ca_id, reason })?;
        if is_delta && !ca.deltas_enabled() {
            return Err(CrlError::InvalidConfiguration {
                ca_id,
                reason: "delta CRLs are disabled".to_string(),
            });
        }
        Ok(())
    }

    async fn last_crls(
        &self,
        ca: &CaConfig,
        partition_index: u32,
    ) -> CrlResult<(Option<CrlDescriptor>, Option<CrlDescriptor>)> {
        let last_base = self
            .crls
            .get_last_crl(&ca.issuer_dn, partition_index, false)
            .await
            .map_err(CrlError::store(ca.ca_id))?;
        let last_delta = self
            .crls
            .get_last_crl(&ca.issuer_dn, partition_index, true)
            .await
            .map_err(CrlError::store(ca.ca_id))?;
        Ok((last_base, last_delta))
    }

    /// Generate, sign and commit one base or delta CRL.
    ///
    /// Nothing becomes visible unless the whole unit commits: a failed signing
    /// call leaves the stores untouched.
    pub async fn generate(
        &self,
        ca: &CaConfig,
        partition_index: u32,
        is_delta: bool,
    ) -> CrlResult<CrlDescriptor> {
        self.check(ca, is_delta)?;

        let lock = self.lock_for(&ca.issuer_dn, partition_index);
        let _guard = lock.lock().await;

        let (last_base, last_delta) = self.last_crls(ca, partition_index).await?;
        self.issue(ca, partition_index, is_delta, last_base, last_delta)
            .await
    }

    /// Generate a CRL only if `due` accepts the latest base and delta CRLs.
    ///
    /// The check runs under the partition lock, so concurrent sweeps agree on
    /// whether a CRL is still needed.
    pub async fn generate_if_due<F>(
        &self,
        ca: &CaConfig,
        partition_index: u32,
        is_delta: bool,
        due: F,
    ) -> CrlResult<Option<CrlDescriptor>>
    where
        F: FnOnce(Option<&CrlDescriptor>, Option<&CrlDescriptor>) -> bool + Send,
    {
        self.check(ca, is_delta)?;

        let lock = self.lock_for(&ca.issuer_dn, partition_index);
        let _guard = lock.lock().await;

        let (last_base, last_delta) = self.last_crls(ca, partition_index).await?;
        if !due(last_base.as_ref(), last_delta.as_ref()) {
            return Ok(None);
        }
        self.issue(ca, partition_index, is_delta, last_base, last_delta)
            .await
            .map(Some)
    }

    async fn issue(
        &self,
        ca: &CaConfig,
        partition_index: u32,
        is_delta: bool,
        last_base: Option<CrlDescriptor>,
        last_delta: Option<CrlDescriptor>,
    ) -> CrlResult<CrlDescriptor> {
        let ca_id = ca.ca_id;
        let base = match (is_delta, last_base.as_ref()) {
            (false, _) => None,
            (true, Some(base)) => Some(base),
            (true, None) => {
                return Err(CrlError::NoBaseCrl {
                    ca_id,
                    partition_index,
                });
            }
        };

        // DER times carry whole seconds
        let now = Utc::now().trunc_subsecs(0);
        let content = self
            .content
            .select_content(
                ca,
                partition_index,
                is_delta,
                base.map(|b| b.create_date),
                now,
            )
            .await?;

        let crl_number = 1 + last_base
            .iter()
            .chain(last_delta.iter())
            .map(|crl| crl.crl_number)
            .max()
            .unwrap_or(0);
        let base_crl_number = base.map(|b| b.crl_number);

        let uris = derive_extensions(
            &ca.default_crl_dist_point,
            &ca.ca_defined_freshest_crl,
            partition_index,
        )
        .map_err(|reason| CrlError::InvalidConfiguration { ca_id, reason })?;
        let extensions = CrlExtensions {
            issuing_distribution_point: uris.distribution_points,
            issuing_distribution_point_critical: ca.crl_distribution_point_on_crl_critical,
            // A delta must not point at a fresher CRL than itself
            freshest_crl: if is_delta {
                Vec::new()
            } else {
                uris.freshest_crl
            },
        };

        let validity = if is_delta {
            ca.delta_crl_period
        } else {
            ca.crl_period
        };
        let expire_date = now
            .checked_add_signed(validity)
            .ok_or_else(|| CrlError::InvalidConfiguration {
                ca_id,
                reason: format!("{} CRL validity {validity} is out of range", kind(is_delta)),
            })?;
        let request = CrlSigningRequest {
            ca_id,
            issuer_dn: ca.issuer_dn.clone(),
            entries: content.entries(),
            crl_number,
            base_crl_number,
            this_update: now,
            next_update: expire_date,
            extensions,
        };

        debug!(
            "Signing {} CRL #{} for CA {} partition {}",
            kind(is_delta),
            crl_number,
            ca_id,
            partition_index
        );
        let der_bytes = timeout(self.signing_timeout, self.signer.sign(request))
            .await
            .map_err(|_| {
                warn!(
                    "Signing CRL for CA {} timed out after {:?}",
                    ca_id, self.signing_timeout
                );
                CrlError::SigningError {
                    ca_id,
                    cause: format!("timed out after {:?}", self.signing_timeout),
                }
            })?
            .map_err(CrlError::signing(ca_id))?;

        let fingerprint = crypto::fingerprint(&der_bytes);
        let descriptor = CrlDescriptor {
            issuer_dn: ca.issuer_dn.clone(),
            partition_index,
            is_delta,
            crl_number,
            base_crl_number,
            create_date: now,
            expire_date,
            fingerprint: fingerprint.clone(),
            der_bytes,
        };
        let queue_entries =
            PublisherEnqueuer::plan(&fingerprint, ArtifactType::Crl, &ca.crl_publishers);
        let published = queue_entries.len();
        let entries = content.certificates.len();

        self.unit_of_work
            .commit(CrlCommit {
                descriptor: descriptor.clone(),
                mutations: content.mutations,
                queue_entries,
            })
            .await
            .map_err(CrlError::store(ca_id))?;

        info!(
            "Issued {} CRL #{} for CA {} partition {} with {} entries, queued for {} publishers",
            kind(is_delta),
            crl_number,
            ca_id,
            partition_index,
            entries,
            published
        );
        Ok(descriptor)
    }
}

fn kind(is_delta: bool) -> &'static str {
    if is_delta { "delta" } else { "base" }
}
