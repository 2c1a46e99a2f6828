mod curves;
mod errors;
mod keys;

pub use curves::Curve;
pub use errors::Error;
pub use keys::CaSigningKey;

use openssl::hash::MessageDigest as Digest;

/// Hash algorithms used for CRL signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
}

impl From<&HashAlg> for Digest {
    fn from(hash_alg: &HashAlg) -> Self {
        match hash_alg {
            HashAlg::Sha256 => Digest::sha256(),
            HashAlg::Sha384 => Digest::sha384(),
        }
    }
}

/// Lowercase hex SHA-256 fingerprint of a DER artifact.
///
/// Used as the stable identity of CRLs in the CRL store and publisher queue.
pub fn fingerprint(der: impl AsRef<[u8]>) -> String {
    hex::encode(openssl::sha::sha256(der.as_ref()))
}
