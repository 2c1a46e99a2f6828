#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crl_engine::{
    crypto::{CaSigningKey, Curve},
    pki::crl::{
        CaConfig, CaId, CaStatus, CrlDescriptor, CrlGenerator, CrlScheduler, CrlSchedulerConfig,
        RevocationReason, RevokedCertificateRecord, SoftwareCrlSigner,
    },
    store::MemoryCaStore,
    telemetry,
};

pub const ISSUER: &str = "CN=Test CA,O=Example";
pub const DP_TEMPLATE: &str = "http://crl*.example.com/TestCRL*.crl";
pub const FRESHEST_TEMPLATE: &str = "http://crl*.example.com/TestDeltaCRL*.crl";

/// A CA with 24h base CRLs, 1h deltas and two publishers
pub fn ca_config(ca_id: CaId, issuer_dn: &str) -> CaConfig {
    CaConfig {
        ca_id,
        issuer_dn: issuer_dn.to_string(),
        status: CaStatus::Active,
        crl_period: Duration::hours(24),
        crl_issue_interval: Duration::zero(),
        crl_overlap_time: Duration::zero(),
        delta_crl_period: Duration::hours(1),
        use_partitioned_crl: false,
        crl_partitions: 0,
        retired_crl_partitions: 0,
        default_crl_dist_point: "http://crl.example.com/TestCRL.crl".to_string(),
        ca_defined_freshest_crl: String::new(),
        crl_distribution_point_on_crl_critical: false,
        crl_publishers: vec![1, 2],
    }
}

pub fn partitioned_ca_config(ca_id: CaId, partitions: u32) -> CaConfig {
    CaConfig {
        use_partitioned_crl: true,
        crl_partitions: partitions,
        default_crl_dist_point: DP_TEMPLATE.to_string(),
        ..ca_config(ca_id, ISSUER)
    }
}

/// A revoked certificate of [`ISSUER`] valid for another year
pub fn revoked(
    fingerprint: &str,
    serial: u8,
    partition_index: u32,
    revocation_date: Option<DateTime<Utc>>,
) -> RevokedCertificateRecord {
    RevokedCertificateRecord {
        fingerprint: fingerprint.to_string(),
        issuer_dn: ISSUER.to_string(),
        serial_number: serial_bytes(serial),
        partition_index,
        revocation_date,
        revocation_reason: RevocationReason::KeyCompromise,
        expire_date: Utc::now() + Duration::days(365),
        archived: false,
    }
}

pub fn serial_bytes(serial: u8) -> Vec<u8> {
    vec![0x01, serial]
}

pub struct Harness {
    pub store: MemoryCaStore,
    pub signer: Arc<SoftwareCrlSigner>,
    pub generator: Arc<CrlGenerator>,
    pub scheduler: CrlScheduler,
}

impl Harness {
    pub async fn new(cas: Vec<CaConfig>) -> Self {
        telemetry::init_tracing();

        let store = MemoryCaStore::new();
        let signer = Arc::new(SoftwareCrlSigner::new());
        for ca in cas {
            signer.register_key(
                ca.issuer_dn.clone(),
                CaSigningKey::generate(Curve::NistP256).unwrap(),
            );
            store.add_ca(ca).await;
        }

        let generator = Arc::new(CrlGenerator::new(store.ports(signer.clone())));
        let scheduler = CrlScheduler::new(CrlSchedulerConfig::default(), generator.clone());

        Self {
            store,
            signer,
            generator,
            scheduler,
        }
    }

    /// Stored CRLs of one partition in issue order
    pub async fn crls_of(&self, partition_index: u32) -> Vec<CrlDescriptor> {
        let mut crls: Vec<_> = self
            .store
            .crls()
            .await
            .into_iter()
            .filter(|crl| crl.partition_index == partition_index)
            .collect();
        crls.sort_by_key(|crl| crl.crl_number);
        crls
    }

    pub async fn last_crl(&self, partition_index: u32) -> CrlDescriptor {
        self.crls_of(partition_index)
            .await
            .pop()
            .expect("no CRL for partition")
    }
}
