use crate::crypto::HashAlg;
use crate::crypto::curves::Curve;
use crate::crypto::errors::{CryptoResult, Error};
use openssl::ec::EcKey;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use std::fmt;

/// An ECDSA key held by a software CA token
#[derive(Clone)]
pub struct CaSigningKey {
    curve: Curve,
    openssl_key: PKey<Private>,
}

impl CaSigningKey {
    /// Generate a new random signing key on the given curve
    pub fn generate(curve: Curve) -> CryptoResult<Self> {
        let group = curve.to_ec_group()?;
        let ec_key = EcKey::generate(&group)?;
        let openssl_key = PKey::from_ec_key(ec_key)?;

        Ok(Self { curve, openssl_key })
    }

    /// Import key from PKCS#8 PEM format
    pub fn from_pkcs8_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let pkey = PKey::private_key_from_pem(pem_bytes.as_ref())?;
        Self::from_pkey(pkey)
    }

    fn from_pkey(pkey: PKey<Private>) -> CryptoResult<Self> {
        let ec_key = pkey
            .ec_key()
            .map_err(|_| Error::Invalid("CA signing key must be an EC key".to_string()))?;
        let curve = Curve::try_from(ec_key.group())?;

        Ok(Self {
            curve,
            openssl_key: pkey,
        })
    }

    /// Get the curve used by this key
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Digest used for signatures made with this key
    pub fn hash_alg(&self) -> HashAlg {
        self.curve.hash_alg()
    }

    /// DER encoded SubjectPublicKeyInfo of the public half
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.openssl_key.public_key_to_der()?)
    }

    /// Sign data, returning a DER encoded ECDSA-Sig-Value
    pub fn sign(&self, data: impl AsRef<[u8]>) -> CryptoResult<Vec<u8>> {
        let digest = MessageDigest::from(&self.hash_alg());
        let mut signer = Signer::new(digest, &self.openssl_key)?;
        signer.update(data.as_ref())?;
        Ok(signer.sign_to_vec()?)
    }

    /// Verify a DER encoded ECDSA signature made by this key
    pub fn verify(&self, data: impl AsRef<[u8]>, signature: &[u8]) -> CryptoResult<bool> {
        let digest = MessageDigest::from(&self.hash_alg());
        let mut verifier = Verifier::new(digest, &self.openssl_key)?;
        verifier.update(data.as_ref())?;
        Ok(verifier.verify(signature)?)
    }
}

impl fmt::Debug for CaSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaSigningKey")
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = CaSigningKey::generate(Curve::NistP256).unwrap();
        let signature = key.sign(b"tbs cert list").unwrap();

        assert!(key.verify(b"tbs cert list", &signature).unwrap());
        assert!(!key.verify(b"tampered", &signature).unwrap());
    }

    #[test]
    fn test_pem_import_keeps_curve() {
        let key = CaSigningKey::generate(Curve::NistP384).unwrap();
        let pem = key.openssl_key.private_key_to_pem_pkcs8().unwrap();

        let imported = CaSigningKey::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(imported.curve(), Curve::NistP384);
        assert!(imported.verify(b"data", &key.sign(b"data").unwrap()).unwrap());
        assert_eq!(imported.hash_alg(), HashAlg::Sha384);
        assert_eq!(
            imported.public_key_der().unwrap(),
            key.public_key_der().unwrap()
        );
    }

    #[test]
    fn test_non_ec_keys_are_rejected() {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let pem = PKey::from_rsa(rsa).unwrap().private_key_to_pem_pkcs8().unwrap();

        assert!(matches!(
            CaSigningKey::from_pkcs8_pem(&pem),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = CaSigningKey::generate(Curve::NistP256).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("NistP256"));
        assert!(!debug.contains("openssl_key"));
    }
}
