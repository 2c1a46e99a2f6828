//! DER encoding of RFC 5280 version 2 CRLs.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Utc};
use der::asn1::{
    BitString, GeneralizedTime, Ia5String, ObjectIdentifier, OctetString, Uint, UtcTime,
};
use der::{Encode, Tag};
use x509_cert::Version;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::crl::dp::{DistributionPoint, IssuingDistributionPoint};
use x509_cert::ext::pkix::crl::{CrlReason, FreshestCrl};
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::time::Time;

use super::oid;
use crate::crypto::HashAlg;
use crate::pki::crl::{CrlSigningRequest, RevocationReason, RevokedEntry};

/// First year that RFC 5280 requires GeneralizedTime for
const GENERALIZED_TIME_YEAR: i32 = 2050;

/// ECDSA signature algorithm identifier for the given digest
pub fn signature_algorithm(hash: HashAlg) -> AlgorithmIdentifierOwned {
    let oid = match hash {
        HashAlg::Sha256 => oid::ECDSA_WITH_SHA256,
        HashAlg::Sha384 => oid::ECDSA_WITH_SHA384,
    };
    AlgorithmIdentifierOwned {
        oid,
        parameters: None,
    }
}

/// Encode an instant as UTCTime, or GeneralizedTime from 2050 on
pub fn encode_time(at: DateTime<Utc>) -> der::Result<Time> {
    let secs = u64::try_from(at.timestamp()).map_err(|_| Tag::UtcTime.value_error())?;
    let since_epoch = StdDuration::from_secs(secs);

    if at.year() < GENERALIZED_TIME_YEAR {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?))
    }
}

fn extension<T: Encode>(
    extn_id: ObjectIdentifier,
    critical: bool,
    value: &T,
) -> der::Result<Extension> {
    Ok(Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

fn full_name(uris: &[String]) -> der::Result<DistributionPointName> {
    let names = uris
        .iter()
        .map(|uri| Ia5String::new(uri).map(GeneralName::UniformResourceIdentifier))
        .collect::<der::Result<Vec<_>>>()?;
    Ok(DistributionPointName::FullName(names))
}

fn reason_code(reason: RevocationReason) -> Option<CrlReason> {
    match reason {
        // RFC 5280 §5.3.1: unspecified SHOULD be expressed by omitting the extension
        RevocationReason::Unspecified => None,
        RevocationReason::KeyCompromise => Some(CrlReason::KeyCompromise),
        RevocationReason::CaCompromise => Some(CrlReason::CaCompromise),
        RevocationReason::AffiliationChanged => Some(CrlReason::AffiliationChanged),
        RevocationReason::Superseded => Some(CrlReason::Superseded),
        RevocationReason::CessationOfOperation => Some(CrlReason::CessationOfOperation),
        RevocationReason::CertificateHold => Some(CrlReason::CertificateHold),
        RevocationReason::RemoveFromCrl => Some(CrlReason::RemoveFromCRL),
        RevocationReason::PrivilegeWithdrawn => Some(CrlReason::PrivilegeWithdrawn),
        RevocationReason::AaCompromise => Some(CrlReason::AaCompromise),
    }
}

fn revoked_cert(entry: &RevokedEntry) -> der::Result<RevokedCert> {
    let serial_number: SerialNumber = SerialNumber::new(&entry.serial_number)?;
    let crl_entry_extensions = match reason_code(entry.reason) {
        Some(reason) => Some(vec![extension(oid::REASON_CODE, false, &reason)?]),
        None => None,
    };

    let revoked: RevokedCert = RevokedCert {
        serial_number,
        revocation_date: encode_time(entry.revocation_date)?,
        crl_entry_extensions,
    };
    Ok(revoked)
}

/// CRL extensions for a signing request, in RFC 5280 order
pub fn crl_extensions(request: &CrlSigningRequest) -> der::Result<Vec<Extension>> {
    let number = Uint::new(&request.crl_number.to_be_bytes())?;
    let mut extensions = vec![extension(oid::CRL_NUMBER, false, &number)?];

    if let Some(base_crl_number) = request.base_crl_number {
        let base = Uint::new(&base_crl_number.to_be_bytes())?;
        // RFC 5280 §5.2.4: the delta CRL indicator is always critical
        extensions.push(extension(oid::DELTA_CRL_INDICATOR, true, &base)?);
    }

    let requested = &request.extensions;
    if !requested.issuing_distribution_point.is_empty() {
        let idp = IssuingDistributionPoint {
            distribution_point: Some(full_name(&requested.issuing_distribution_point)?),
            only_contains_user_certs: false,
            only_contains_ca_certs: false,
            only_some_reasons: None,
            indirect_crl: false,
            only_contains_attribute_certs: false,
        };
        extensions.push(extension(
            oid::ISSUING_DISTRIBUTION_POINT,
            requested.issuing_distribution_point_critical,
            &idp,
        )?);
    }

    if !requested.freshest_crl.is_empty() {
        let freshest = FreshestCrl(vec![DistributionPoint {
            distribution_point: Some(full_name(&requested.freshest_crl)?),
            reasons: None,
            crl_issuer: None,
        }]);
        extensions.push(extension(oid::FRESHEST_CRL, false, &freshest)?);
    }

    Ok(extensions)
}

/// Build the to-be-signed part of a CRL
pub fn build_tbs_cert_list(
    request: &CrlSigningRequest,
    algorithm: &AlgorithmIdentifierOwned,
) -> der::Result<TbsCertList> {
    let revoked = request
        .entries
        .iter()
        .map(revoked_cert)
        .collect::<der::Result<Vec<_>>>()?;

    let tbs: TbsCertList = TbsCertList {
        version: Version::V2,
        signature: algorithm.clone(),
        issuer: Name::from_str(&request.issuer_dn)?,
        this_update: encode_time(request.this_update)?,
        next_update: Some(encode_time(request.next_update)?),
        // An empty revokedCertificates sequence must be omitted
        revoked_certificates: (!revoked.is_empty()).then_some(revoked),
        crl_extensions: Some(crl_extensions(request)?),
    };
    Ok(tbs)
}

/// Wrap a signed TBSCertList into the final DER encoded CRL
pub fn assemble_certificate_list(
    tbs_cert_list: TbsCertList,
    signature: &[u8],
) -> der::Result<Vec<u8>> {
    let signature_algorithm = tbs_cert_list.signature.clone();
    let crl: CertificateList = CertificateList {
        tbs_cert_list,
        signature_algorithm,
        signature: BitString::from_bytes(signature)?,
    };
    crl.to_der()
}
