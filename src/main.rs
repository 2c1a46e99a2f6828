use std::sync::Arc;

use crl_engine::{
    config::Config,
    crypto::{self, CaSigningKey, Curve},
    pki::crl::{CaConfig, CrlGenerator, CrlScheduler, SoftwareCrlSigner},
    store::MemoryCaStore,
    telemetry,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded scheduler configuration: {:?}", config.scheduler);

    let store = MemoryCaStore::new();
    let signer = Arc::new(SoftwareCrlSigner::new());
    for settings in &config.cas {
        let key = match settings.load_signing_key()? {
            Some(key) => key,
            None => {
                warn!(
                    "No signing key configured for CA {}, generating an ephemeral one",
                    settings.ca_id
                );
                CaSigningKey::generate(Curve::NistP256)?
            }
        };
        info!(
            "CA {} signs with a {} key, public key fingerprint {}",
            settings.ca_id,
            key.curve(),
            crypto::fingerprint(key.public_key_der()?)
        );

        let ca = CaConfig::try_from(settings.clone())?;
        signer.register_key(ca.issuer_dn.clone(), key);
        store.add_ca(ca).await;
    }

    let generator = CrlGenerator::new(store.ports(signer))
        .with_signing_timeout(config.scheduler.signing_timeout());
    let scheduler = CrlScheduler::new(config.scheduler.scheduler_config(), Arc::new(generator));

    let issued = scheduler.trigger_immediate_update().await?;
    info!("Initial CRL sweep issued {} CRLs", issued);

    let handle = scheduler.start();
    tokio::signal::ctrl_c().await?;
    info!("Shutting down CRL scheduler");
    handle.abort();
    Ok(())
}
