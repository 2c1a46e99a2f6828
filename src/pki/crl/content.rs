use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::errors::{CrlError, CrlResult};
use super::ports::{CertificateStore, RevokedEntry};
use super::types::{CaConfig, CertificateMutation, RevocationReason, RevokedCertificateRecord};

/// Certificates selected for one CRL and the store mutations that go with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrlContent {
    /// Records to list on the CRL, every revocation date set
    pub certificates: Vec<RevokedCertificateRecord>,
    pub mutations: Vec<CertificateMutation>,
}

impl CrlContent {
    /// CRL entries for the signing engine
    pub fn entries(&self) -> Vec<RevokedEntry> {
        self.certificates
            .iter()
            .filter_map(|record| {
                record.revocation_date.map(|revocation_date| RevokedEntry {
                    serial_number: record.serial_number.clone(),
                    revocation_date,
                    reason: record.revocation_reason,
                })
            })
            .collect()
    }

    pub fn archived_count(&self) -> usize {
        self.mutations
            .iter()
            .filter(|m| matches!(m, CertificateMutation::Archive { .. }))
            .count()
    }
}

/// Inputs that scope a content plan
#[derive(Debug, Clone, Copy)]
pub struct ContentScope<'a> {
    pub issuer_dn: &'a str,
    pub partition_index: u32,
    pub is_delta: bool,
    /// Creation time of the base CRL a delta extends
    pub since: Option<DateTime<Utc>>,
    pub crl_period: Duration,
    pub now: DateTime<Utc>,
}

/// Decide which records go on a CRL and which mutations it implies.
///
/// Pure function over the candidate records, nothing is committed here.
pub fn plan_content(
    records: Vec<RevokedCertificateRecord>,
    scope: ContentScope<'_>,
) -> CrlContent {
    // No cutoff when the period reaches past the earliest representable date
    let archive_cutoff = scope.now.checked_sub_signed(scope.crl_period);
    let mut content = CrlContent::default();

    for mut record in records {
        if record.issuer_dn != scope.issuer_dn || record.partition_index != scope.partition_index
        {
            debug!(
                "Ignoring certificate {} outside issuer partition {}",
                record.fingerprint, scope.partition_index
            );
            continue;
        }
        if record.archived {
            continue;
        }
        if archive_cutoff.is_some_and(|cutoff| record.expire_date < cutoff) {
            content.mutations.push(CertificateMutation::Archive {
                fingerprint: record.fingerprint,
            });
            continue;
        }

        if scope.is_delta {
            if let (Some(revoked_at), Some(since)) = (record.revocation_date, scope.since)
                && revoked_at <= since
            {
                continue;
            }
        } else if record.revocation_reason == RevocationReason::RemoveFromCrl {
            // Taken off hold, only deltas still announce it
            continue;
        }

        if record.revocation_date.is_none() {
            content.mutations.push(CertificateMutation::SetRevocationDate {
                fingerprint: record.fingerprint.clone(),
                date: scope.now,
            });
            record.revocation_date = Some(scope.now);
        }
        content.certificates.push(record);
    }

    content
        .certificates
        .sort_by(|a, b| serial_order(&a.serial_number, &b.serial_number));
    content
}

/// Numeric order of big-endian serial numbers
fn serial_order(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(serial: &[u8]) -> &[u8] {
    let start = serial
        .iter()
        .position(|&byte| byte != 0)
        .unwrap_or(serial.len());
    &serial[start..]
}

/// Selects CRL content from the certificate store
#[derive(Clone)]
pub struct CrlContentBuilder {
    certificates: Arc<dyn CertificateStore>,
}

impl CrlContentBuilder {
    pub fn new(certificates: Arc<dyn CertificateStore>) -> Self {
        Self { certificates }
    }

    /// Select the certificates and mutations for one (CA, partition, kind) CRL
    pub async fn select_content(
        &self,
        ca: &CaConfig,
        partition_index: u32,
        is_delta: bool,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CrlResult<CrlContent> {
        let records = self
            .certificates
            .list_revoked(
                &ca.issuer_dn,
                partition_index,
                if is_delta { since } else { None },
            )
            .await
            .map_err(CrlError::store(ca.ca_id))?;

        let content = plan_content(
            records,
            ContentScope {
                issuer_dn: &ca.issuer_dn,
                partition_index,
                is_delta,
                since,
                crl_period: ca.crl_period,
                now,
            },
        );

        debug!(
            "CA {} partition {} {} CRL: {} entries, {} to archive",
            ca.ca_id,
            partition_index,
            if is_delta { "delta" } else { "base" },
            content.certificates.len(),
            content.archived_count()
        );
        Ok(content)
    }
}
