use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use der::Encode;
use tracing::{debug, warn};

use crate::asn1::crl::{assemble_certificate_list, build_tbs_cert_list, signature_algorithm};
use crate::crypto::CaSigningKey;

use super::errors::SigningEngineError;
use super::ports::{CrlSigningRequest, SigningEngine};

/// Software CA token holding one ECDSA key per issuer.
///
/// Tokens can be taken offline to model an unavailable HSM.
#[derive(Debug, Default)]
pub struct SoftwareCrlSigner {
    keys: DashMap<String, Arc<CaSigningKey>>,
    offline: DashSet<String>,
}

impl SoftwareCrlSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the signing key for an issuer, replacing any previous key
    pub fn register_key(&self, issuer_dn: impl Into<String>, key: CaSigningKey) {
        let issuer_dn = issuer_dn.into();
        debug!("Registering {} signing key for {}", key.curve(), issuer_dn);
        self.keys.insert(issuer_dn, Arc::new(key));
    }

    pub fn set_offline(&self, issuer_dn: &str, offline: bool) {
        if offline {
            warn!("CA token for {} is now offline", issuer_dn);
            self.offline.insert(issuer_dn.to_string());
        } else {
            self.offline.remove(issuer_dn);
        }
    }

    pub fn key(&self, issuer_dn: &str) -> Option<Arc<CaSigningKey>> {
        self.keys.get(issuer_dn).map(|entry| Arc::clone(entry.value()))
    }
}

fn sign_crl(
    key: &CaSigningKey,
    request: &CrlSigningRequest,
) -> Result<Vec<u8>, SigningEngineError> {
    let encoding_failed = |e: der::Error| SigningEngineError::Failed(format!("encoding: {e}"));

    let algorithm = signature_algorithm(key.hash_alg());
    let tbs = build_tbs_cert_list(request, &algorithm).map_err(encoding_failed)?;
    let tbs_der = tbs.to_der().map_err(encoding_failed)?;

    let signature = key
        .sign(&tbs_der)
        .map_err(|e| SigningEngineError::Failed(e.to_string()))?;

    assemble_certificate_list(tbs, &signature).map_err(encoding_failed)
}

#[async_trait]
impl SigningEngine for SoftwareCrlSigner {
    async fn sign(&self, request: CrlSigningRequest) -> Result<Vec<u8>, SigningEngineError> {
        if self.offline.contains(&request.issuer_dn) {
            return Err(SigningEngineError::TokenOffline);
        }
        let key = self
            .key(&request.issuer_dn)
            .ok_or_else(|| SigningEngineError::UnknownIssuer(request.issuer_dn.clone()))?;

        tokio::task::spawn_blocking(move || sign_crl(&key, &request))
            .await
            .map_err(|e| SigningEngineError::Failed(format!("signing task failed: {e}")))?
    }
}
