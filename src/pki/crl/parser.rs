use chrono::{DateTime, Utc};
use der::Decode;
use der::asn1::{ObjectIdentifier, Uint};
use tracing::debug;
use x509_cert::ext::pkix::crl::FreshestCrl;
use x509_cert::ext::pkix::crl::dp::IssuingDistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_parser::prelude::*;

use crate::asn1::oid;
use crate::crypto::CaSigningKey;

use super::errors::{CrlError, CrlResult};
use super::types::CrlDescriptor;

/// Fields read back from a DER encoded CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlInfo {
    pub issuer: String,
    pub crl_number: Option<u64>,
    /// Value of the Delta CRL Indicator
    pub base_crl_number: Option<u64>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub revoked_serials: Vec<Vec<u8>>,
    pub issuing_distribution_point: Vec<String>,
    pub issuing_distribution_point_critical: bool,
    pub freshest_crl: Vec<String>,
    tbs_der: Vec<u8>,
    signature: Vec<u8>,
}

impl CrlInfo {
    /// Parse a CRL from DER data
    pub fn from_der(der_data: &[u8]) -> CrlResult<Self> {
        let (_, crl) =
            CertificateRevocationList::from_der(der_data).map_err(|e| CrlError::Parse(e.into()))?;

        let mut info = Self {
            issuer: crl.issuer().to_string(),
            crl_number: crl.crl_number().map(|n| be_bytes_to_u64(&n.to_bytes_be())),
            base_crl_number: None,
            this_update: to_utc(crl.last_update())?,
            next_update: crl.next_update().map(to_utc).transpose()?,
            revoked_serials: crl
                .tbs_cert_list
                .revoked_certificates
                .iter()
                .map(|revoked| revoked.user_certificate.to_bytes_be())
                .collect(),
            issuing_distribution_point: Vec::new(),
            issuing_distribution_point_critical: false,
            freshest_crl: Vec::new(),
            tbs_der: crl.tbs_cert_list.as_ref().to_vec(),
            signature: crl.signature_value.data.to_vec(),
        };

        for ext in crl.extensions() {
            if is_oid(ext, oid::DELTA_CRL_INDICATOR) {
                let base = Uint::from_der(ext.value)?;
                info.base_crl_number = Some(be_bytes_to_u64(base.as_bytes()));
            } else if is_oid(ext, oid::ISSUING_DISTRIBUTION_POINT) {
                let idp = IssuingDistributionPoint::from_der(ext.value)?;
                info.issuing_distribution_point = idp
                    .distribution_point
                    .as_ref()
                    .map(uris)
                    .unwrap_or_default();
                info.issuing_distribution_point_critical = ext.critical;
            } else if is_oid(ext, oid::FRESHEST_CRL) {
                let freshest = FreshestCrl::from_der(ext.value)?;
                info.freshest_crl = freshest
                    .0
                    .iter()
                    .filter_map(|dp| dp.distribution_point.as_ref())
                    .flat_map(uris)
                    .collect();
            }
        }

        debug!(
            "Parsed CRL #{:?} from {} with {} entries",
            info.crl_number,
            info.issuer,
            info.revoked_serials.len()
        );
        Ok(info)
    }

    pub fn is_delta(&self) -> bool {
        self.base_crl_number.is_some()
    }

    /// Whether the encoded numbering agrees with a stored descriptor
    pub fn matches(&self, descriptor: &CrlDescriptor) -> bool {
        self.crl_number == Some(descriptor.crl_number)
            && self.base_crl_number == descriptor.base_crl_number
            && self.is_delta() == descriptor.is_delta
    }

    /// Verify the CRL signature with the issuing CA key
    pub fn verify_signature(&self, key: &CaSigningKey) -> CrlResult<bool> {
        key.verify(&self.tbs_der, &self.signature).map_err(|e| {
            debug!("CRL signature check failed: {}", e);
            CrlError::Parse(X509Error::SignatureVerificationError)
        })
    }
}

fn is_oid(ext: &X509Extension<'_>, expected: ObjectIdentifier) -> bool {
    ext.oid.as_bytes() == expected.as_bytes()
}

fn uris(name: &DistributionPointName) -> Vec<String> {
    match name {
        DistributionPointName::FullName(names) => names
            .iter()
            .filter_map(|name| match name {
                GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                _ => None,
            })
            .collect(),
        DistributionPointName::NameRelativeToCRLIssuer(_) => Vec::new(),
    }
}

fn to_utc(time: ASN1Time) -> CrlResult<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or(CrlError::Parse(X509Error::InvalidDate))
}

/// Interpret big-endian bytes as an unsigned integer, keeping the low 64 bits
fn be_bytes_to_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_shl(8) | u64::from(b))
}
