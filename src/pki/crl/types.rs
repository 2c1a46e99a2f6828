use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric CA identifier as assigned by the CA registry
pub type CaId = i32;

/// Identifier of a configured publisher
pub type PublisherId = i32;

/// Partition index of certificates issued before partitioning was enabled.
///
/// This legacy partition always gets its own CRL sequence.
pub const NO_CRL_PARTITION: u32 = 0;

/// Longest accepted CRL period, issue interval or overlap
pub const MAX_CRL_PERIOD_DAYS: i64 = 36_500;

/// Operational status of a CA as reported by the CA registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaStatus {
    Active,
    Offline,
    Expired,
    External,
    Uninitialized,
}

/// Per-CA revocation policy, read-only to this engine
#[derive(Debug, Clone)]
pub struct CaConfig {
    pub ca_id: CaId,
    pub issuer_dn: String,
    pub status: CaStatus,
    /// Validity of a base CRL
    pub crl_period: Duration,
    /// Fixed reissue cadence for base CRLs, zero when disabled
    pub crl_issue_interval: Duration,
    /// Grace window before expiry in which a new CRL is issued
    pub crl_overlap_time: Duration,
    /// Validity of a delta CRL, zero disables delta CRLs
    pub delta_crl_period: Duration,
    pub use_partitioned_crl: bool,
    pub crl_partitions: u32,
    pub retired_crl_partitions: u32,
    /// Distribution point template, `*` is the partition token
    pub default_crl_dist_point: String,
    /// Freshest CRL template, `*` is the partition token
    pub ca_defined_freshest_crl: String,
    pub crl_distribution_point_on_crl_critical: bool,
    pub crl_publishers: Vec<PublisherId>,
}

impl CaConfig {
    /// Partition indexes that receive CRLs, the legacy partition included.
    ///
    /// Retired partitions keep receiving CRLs so their revocations stay published.
    pub fn partition_indexes(&self) -> Vec<u32> {
        if self.use_partitioned_crl {
            (NO_CRL_PARTITION..=self.crl_partitions).collect()
        } else {
            vec![NO_CRL_PARTITION]
        }
    }

    pub fn deltas_enabled(&self) -> bool {
        self.delta_crl_period > Duration::zero()
    }

    /// Check the CRL periods, which must stay within [`MAX_CRL_PERIOD_DAYS`]
    pub fn check_periods(&self) -> Result<(), String> {
        if self.crl_period <= Duration::zero() {
            return Err("crl period must be positive".to_string());
        }
        let max = Duration::days(MAX_CRL_PERIOD_DAYS);
        for (name, period) in [
            ("crl period", self.crl_period),
            ("delta crl period", self.delta_crl_period),
            ("crl issue interval", self.crl_issue_interval),
            ("crl overlap time", self.crl_overlap_time),
        ] {
            if period < Duration::zero() || period > max {
                return Err(format!("{name} must be between 0 and {MAX_CRL_PERIOD_DAYS} days"));
            }
        }
        Ok(())
    }

    /// Partition settings that still issue CRLs but leave no partition for new certificates
    pub fn partition_warnings(&self) -> Vec<String> {
        if !self.use_partitioned_crl {
            return Vec::new();
        }
        if self.crl_partitions == 0 {
            return vec![
                "partitioned CRLs without partitions only cover the legacy partition".to_string(),
            ];
        }
        if self.retired_crl_partitions >= self.crl_partitions {
            return vec![format!(
                "{} retired partitions leave no active partition out of {}",
                self.retired_crl_partitions, self.crl_partitions
            )];
        }
        Vec::new()
    }
}

/// CRLReason codes as defined in RFC 5280 §5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(RevocationReason::Unspecified),
            1 => Some(RevocationReason::KeyCompromise),
            2 => Some(RevocationReason::CaCompromise),
            3 => Some(RevocationReason::AffiliationChanged),
            4 => Some(RevocationReason::Superseded),
            5 => Some(RevocationReason::CessationOfOperation),
            6 => Some(RevocationReason::CertificateHold),
            8 => Some(RevocationReason::RemoveFromCrl),
            9 => Some(RevocationReason::PrivilegeWithdrawn),
            10 => Some(RevocationReason::AaCompromise),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }
}

/// One revoked certificate issued by a CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedCertificateRecord {
    pub fingerprint: String,
    pub issuer_dn: String,
    /// Big-endian serial number bytes
    pub serial_number: Vec<u8>,
    pub partition_index: u32,
    /// Unset until the revocation is finalized on the first CRL that carries it
    pub revocation_date: Option<DateTime<Utc>>,
    pub revocation_reason: RevocationReason,
    pub expire_date: DateTime<Utc>,
    pub archived: bool,
}

/// Side effect on the certificate store that must commit together with a CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateMutation {
    /// Exclude the certificate from all future CRLs
    Archive { fingerprint: String },
    /// Finalize a revocation that had no date yet
    SetRevocationDate {
        fingerprint: String,
        date: DateTime<Utc>,
    },
}

impl CertificateMutation {
    pub fn fingerprint(&self) -> &str {
        match self {
            CertificateMutation::Archive { fingerprint } => fingerprint,
            CertificateMutation::SetRevocationDate { fingerprint, .. } => fingerprint,
        }
    }
}

/// One generated CRL, immutable once stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlDescriptor {
    pub issuer_dn: String,
    pub partition_index: u32,
    pub is_delta: bool,
    pub crl_number: u64,
    /// Number of the base CRL a delta extends
    pub base_crl_number: Option<u64>,
    pub create_date: DateTime<Utc>,
    pub expire_date: DateTime<Utc>,
    pub fingerprint: String,
    pub der_bytes: Vec<u8>,
}

/// Kind of artifact handed to publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Crl,
    Certificate,
}

/// A pending hand-off of an artifact to one publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherQueueEntry {
    pub id: Uuid,
    pub publisher_id: PublisherId,
    pub fingerprint: String,
    pub artifact_type: ArtifactType,
    pub created_at: DateTime<Utc>,
}
