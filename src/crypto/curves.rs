use crate::crypto::HashAlg;
use crate::crypto::errors::{CryptoResult, Error};
use openssl::ec::{EcGroup, EcGroupRef};
use openssl::nid::Nid;
use std::fmt;

/// Elliptic curves supported for CA signing keys
#[derive(Debug, Clone, Default, Copy, PartialEq, Eq)]
pub enum Curve {
    /// NIST P-256 (secp256r1)
    #[default]
    NistP256,
    /// NIST P-384 (secp384r1)
    NistP384,
}

impl Curve {
    /// Get the OpenSSL NID for this curve
    pub fn to_nid(self) -> Nid {
        match self {
            Curve::NistP256 => Nid::X9_62_PRIME256V1,
            Curve::NistP384 => Nid::SECP384R1,
        }
    }

    /// Create an OpenSSL EcGroup for this curve
    pub fn to_ec_group(self) -> CryptoResult<EcGroup> {
        Ok(EcGroup::from_curve_name(self.to_nid())?)
    }

    /// Digest paired with this curve when signing CRLs
    pub fn hash_alg(self) -> HashAlg {
        match self {
            Curve::NistP256 => HashAlg::Sha256,
            Curve::NistP384 => HashAlg::Sha384,
        }
    }
}

impl TryFrom<&EcGroupRef> for Curve {
    type Error = Error;

    fn try_from(group: &EcGroupRef) -> Result<Self, Self::Error> {
        match group.curve_name() {
            Some(Nid::X9_62_PRIME256V1) => Ok(Curve::NistP256),
            Some(Nid::SECP384R1) => Ok(Curve::NistP384),
            Some(nid) => Err(Error::UnsupportedCurve(format!("{nid:?}"))),
            None => Err(Error::UnsupportedCurve("unnamed curve".to_string())),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Curve::NistP256 => "NIST P-256",
            Curve::NistP384 => "NIST P-384",
        };
        write!(f, "{name}")
    }
}
