mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{Harness, ISSUER, ca_config, partitioned_ca_config, revoked, serial_bytes};
use crl_engine::crypto::{CaSigningKey, Curve};
use crl_engine::pki::crl::{
    CaConfig, CaId, CaRegistry, CaStatus, CertificateStore, CrlError, CrlGenerator, CrlInfo,
    CrlPorts, CrlScheduler, CrlSchedulerConfig, CrlSigningRequest, NO_CRL_PARTITION,
    PersistenceError, PublisherId, PublisherQueue, PublisherQueueEntry, RevocationReason,
    RevokedCertificateRecord, SigningEngine, SigningEngineError, SoftwareCrlSigner,
};
use crl_engine::store::{CompensatingUnitOfWork, MemoryCaStore};

mockall::mock! {
    pub Signer {}

    #[async_trait]
    impl SigningEngine for Signer {
        async fn sign(&self, request: CrlSigningRequest) -> Result<Vec<u8>, SigningEngineError>;
    }
}

mockall::mock! {
    pub Queue {}

    #[async_trait]
    impl PublisherQueue for Queue {
        async fn enqueue(&self, entry: &PublisherQueueEntry) -> Result<(), PersistenceError>;
        async fn remove(
            &self,
            publisher_id: PublisherId,
            fingerprint: &str,
        ) -> Result<(), PersistenceError>;
    }
}

mockall::mock! {
    pub Certificates {}

    #[async_trait]
    impl CertificateStore for Certificates {
        async fn list_revoked(
            &self,
            issuer_dn: &str,
            partition_index: u32,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<RevokedCertificateRecord>, PersistenceError>;
        async fn archive(&self, fingerprint: &str) -> Result<(), PersistenceError>;
        async fn set_revocation_date(
            &self,
            fingerprint: &str,
            date: DateTime<Utc>,
        ) -> Result<(), PersistenceError>;
    }
}

mockall::mock! {
    pub Registry {}

    #[async_trait]
    impl CaRegistry for Registry {
        async fn list_ca_ids(&self) -> Result<Vec<CaId>, PersistenceError>;
        async fn get_ca(&self, ca_id: CaId) -> Result<Option<CaConfig>, PersistenceError>;
    }
}

/// Signing engine that never answers in time
struct StalledSigner;

/// Software signer that records how many signatures run at once
struct TrackingSigner {
    inner: SoftwareCrlSigner,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SigningEngine for TrackingSigner {
    async fn sign(&self, request: CrlSigningRequest) -> Result<Vec<u8>, SigningEngineError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(25)).await;
        let signed = self.inner.sign(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        signed
    }
}

#[async_trait]
impl SigningEngine for StalledSigner {
    async fn sign(&self, _request: CrlSigningRequest) -> Result<Vec<u8>, SigningEngineError> {
        tokio::time::sleep(StdDuration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

async fn serials(h: &Harness, partition_index: u32) -> Vec<Vec<u8>> {
    CrlInfo::from_der(&h.last_crl(partition_index).await.der_bytes)
        .unwrap()
        .revoked_serials
}

#[tokio::test]
async fn crl_numbers_strictly_increase_across_base_and_delta() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;

    for round in 0..3 {
        h.store
            .add_certificate(revoked(&format!("r{round}"), round, 0, None))
            .await;
        h.scheduler.force_crl(1).await.unwrap();
        h.scheduler.force_delta_crl(1).await.unwrap();
    }

    let numbers: Vec<_> = h
        .store
        .crls()
        .await
        .iter()
        .map(|crl| crl.crl_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn concurrent_generation_never_reuses_a_number() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    let ca = h.generator.resolve_ca(1).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let generator = h.generator.clone();
        let ca = ca.clone();
        tasks.spawn(async move { generator.generate(&ca, NO_CRL_PARTITION, false).await });
    }

    let mut numbers = Vec::new();
    while let Some(result) = tasks.join_next().await {
        numbers.push(result.unwrap().unwrap().crl_number);
    }
    numbers.sort();
    assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn delta_links_to_latest_base() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;

    h.scheduler.force_crl(1).await.unwrap();
    h.scheduler
        .create_delta_crls(None, Duration::zero())
        .await
        .unwrap();
    assert_eq!(h.last_crl(0).await.base_crl_number, Some(1));

    h.scheduler.force_crl(1).await.unwrap();
    // The current delta now references a superseded base
    let issued = h
        .scheduler
        .create_delta_crls(None, Duration::zero())
        .await
        .unwrap();
    assert_eq!(issued, 1);

    let delta = h.last_crl(0).await;
    assert_eq!(delta.crl_number, 4);
    assert_eq!(delta.base_crl_number, Some(3));
    assert_eq!(
        CrlInfo::from_der(&delta.der_bytes).unwrap().base_crl_number,
        Some(3)
    );
}

#[tokio::test]
async fn delta_requires_a_base() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    let ca = h.generator.resolve_ca(1).await.unwrap();

    assert!(matches!(
        h.generator.generate(&ca, NO_CRL_PARTITION, true).await,
        Err(CrlError::NoBaseCrl {
            ca_id: 1,
            partition_index: 0
        })
    ));
    assert_eq!(
        h.scheduler
            .create_delta_crls(None, Duration::zero())
            .await
            .unwrap(),
        0
    );
    assert!(h.store.crls().await.is_empty());
}

#[tokio::test]
async fn partitions_only_list_their_own_certificates() {
    let h = Harness::new(vec![partitioned_ca_config(1, 2)]).await;
    let revoked_at = Some(Utc::now() - Duration::hours(1));
    for (fp, serial, partition) in [("p0", 10, 0), ("p1a", 11, 1), ("p1b", 12, 1), ("p2", 13, 2)] {
        h.store
            .add_certificate(revoked(fp, serial, partition, revoked_at))
            .await;
    }

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        3
    );

    assert_eq!(serials(&h, 0).await, vec![serial_bytes(10)]);
    assert_eq!(serials(&h, 1).await, vec![serial_bytes(11), serial_bytes(12)]);
    assert_eq!(serials(&h, 2).await, vec![serial_bytes(13)]);

    // Every partition keeps its own number sequence
    for partition in 0..=2 {
        assert_eq!(h.last_crl(partition).await.crl_number, 1);
    }
}

#[tokio::test]
async fn expired_certificates_are_archived_for_good() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    let mut expired = revoked("expired", 1, 0, Some(Utc::now() - Duration::days(60)));
    expired.expire_date = Utc::now() - Duration::hours(25);
    h.store.add_certificate(expired).await;
    h.store
        .add_certificate(revoked("valid", 2, 0, Some(Utc::now() - Duration::days(1))))
        .await;

    h.scheduler.force_crl(1).await.unwrap();
    assert!(h.store.certificate("expired").await.unwrap().archived);
    assert_eq!(
        CrlInfo::from_der(&h.last_crl(0).await.der_bytes)
            .unwrap()
            .revoked_serials,
        vec![serial_bytes(2)]
    );

    h.scheduler.force_crl(1).await.unwrap();
    h.scheduler.force_delta_crl(1).await.unwrap();
    assert!(h.store.certificate("expired").await.unwrap().archived);
    for crl in h.store.crls().await {
        let serials = CrlInfo::from_der(&crl.der_bytes).unwrap().revoked_serials;
        assert!(!serials.contains(&serial_bytes(1)));
    }
}

#[tokio::test]
async fn pending_revocation_date_is_finalized_with_the_crl() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    h.store.add_certificate(revoked("pending", 7, 0, None)).await;

    h.scheduler.force_crl(1).await.unwrap();

    let crl = h.last_crl(0).await;
    let record = h.store.certificate("pending").await.unwrap();
    assert_eq!(record.revocation_date, Some(crl.create_date));
    assert_eq!(
        CrlInfo::from_der(&crl.der_bytes).unwrap().revoked_serials,
        vec![serial_bytes(7)]
    );
}

#[tokio::test]
async fn repeated_sweeps_are_idempotent() {
    let h = Harness::new(vec![ca_config(1, ISSUER), ca_config(2, "CN=Second CA")]).await;

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        2
    );
    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        0
    );
    assert_eq!(
        h.scheduler
            .create_delta_crls(None, Duration::zero())
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        h.scheduler
            .create_delta_crls(None, Duration::zero())
            .await
            .unwrap(),
        0
    );
    assert_eq!(h.scheduler.trigger_immediate_update().await.unwrap(), 0);
    assert_eq!(h.store.crls().await.len(), 4);
}

#[tokio::test]
async fn offline_token_leaves_no_trace() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    h.store.add_certificate(revoked("pending", 1, 0, None)).await;
    h.signer.set_offline(ISSUER, true);

    // A sweep logs and moves on
    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        0
    );
    assert!(matches!(
        h.scheduler.force_crl(1).await,
        Err(CrlError::TokenOffline { ca_id: 1 })
    ));

    assert!(h.store.crls().await.is_empty());
    assert!(h.store.queue_entries().await.is_empty());
    assert!(
        h.store
            .certificate("pending")
            .await
            .unwrap()
            .revocation_date
            .is_none()
    );

    // Once back online the CA is picked up by the next sweep
    h.signer.set_offline(ISSUER, false);
    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn token_offline_from_signing_engine_is_reported() {
    let store = MemoryCaStore::new();
    store.add_ca(ca_config(1, ISSUER)).await;

    let mut signer = MockSigner::new();
    signer
        .expect_sign()
        .times(1)
        .returning(|_| Err(SigningEngineError::TokenOffline));
    let generator = CrlGenerator::new(store.ports(Arc::new(signer)));

    assert!(matches!(
        generator.generate_for(1, NO_CRL_PARTITION, false).await,
        Err(CrlError::TokenOffline { ca_id: 1 })
    ));
    assert!(store.crls().await.is_empty());
}

#[tokio::test]
async fn signing_timeout_is_a_signing_error() {
    let store = MemoryCaStore::new();
    store.add_ca(ca_config(1, ISSUER)).await;
    let generator = CrlGenerator::new(store.ports(Arc::new(StalledSigner)))
        .with_signing_timeout(StdDuration::from_millis(50));

    let err = generator
        .generate_for(1, NO_CRL_PARTITION, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CrlError::SigningError { ca_id: 1, .. }));
    assert!(err.is_retryable());
    assert!(store.crls().await.is_empty());
}

#[tokio::test]
async fn offline_and_external_cas_are_skipped() {
    let mut offline = ca_config(2, "CN=Offline CA");
    offline.status = CaStatus::Offline;
    let mut external = ca_config(3, "CN=External CA");
    external.status = CaStatus::External;
    let mut expired = ca_config(4, "CN=Expired CA");
    expired.status = CaStatus::Expired;
    let h = Harness::new(vec![ca_config(1, ISSUER), offline, external, expired]).await;

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        2
    );
    let issuers: Vec<_> = h
        .store
        .crls()
        .await
        .into_iter()
        .map(|crl| crl.issuer_dn)
        .collect();
    assert!(issuers.contains(&ISSUER.to_string()));
    assert!(issuers.contains(&"CN=Expired CA".to_string()));

    assert!(matches!(
        h.scheduler.force_crl(2).await,
        Err(CrlError::TokenOffline { ca_id: 2 })
    ));
}

#[tokio::test]
async fn unknown_ca_ids_fail_before_any_work() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;

    assert!(matches!(
        h.scheduler.create_crls(Some(&[1, 99][..]), Duration::zero()).await,
        Err(CrlError::CaNotFound { ca_id: 99 })
    ));
    assert!(matches!(
        h.scheduler.force_delta_crl(42).await,
        Err(CrlError::CaNotFound { ca_id: 42 })
    ));
    assert!(h.store.crls().await.is_empty());

    assert_eq!(
        h.scheduler
            .create_crls(Some(&[1][..]), Duration::zero())
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn duplicate_publishers_get_one_entry() {
    let mut ca = ca_config(1, ISSUER);
    ca.crl_publishers = vec![5, 6, 5];
    let h = Harness::new(vec![ca]).await;

    h.scheduler.force_crl(1).await.unwrap();

    let crl = h.last_crl(0).await;
    let publishers: Vec<_> = h
        .store
        .queue_entries()
        .await
        .into_iter()
        .filter(|e| e.fingerprint == crl.fingerprint)
        .map(|e| e.publisher_id)
        .collect();
    assert_eq!(publishers, vec![5, 6]);
}

#[tokio::test]
async fn failed_enqueue_rolls_back_the_crl() {
    let store = MemoryCaStore::new();
    store.add_ca(ca_config(1, ISSUER)).await;
    store.add_certificate(revoked("pending", 1, 0, None)).await;

    let mut queue = MockQueue::new();
    let mut calls = 0;
    queue.expect_enqueue().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(())
        } else {
            Err(PersistenceError::Backend("queue unavailable".to_string()))
        }
    });
    queue.expect_remove().times(1).returning(|_, _| Ok(()));

    let signer = Arc::new(SoftwareCrlSigner::new());
    signer.register_key(ISSUER, CaSigningKey::generate(Curve::NistP384).unwrap());

    let shared = Arc::new(store.clone());
    let ports = CrlPorts {
        unit_of_work: Arc::new(CompensatingUnitOfWork::new(
            shared.clone(),
            shared,
            Arc::new(queue),
        )),
        ..store.ports(signer)
    };
    let generator = CrlGenerator::new(ports);

    let err = generator
        .generate_for(1, NO_CRL_PARTITION, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrlError::StoreError {
            ca_id: 1,
            cause: PersistenceError::Backend(_)
        }
    ));
    assert!(store.crls().await.is_empty());

    // Finalized dates are idempotent and stay applied
    assert!(
        store
            .certificate("pending")
            .await
            .unwrap()
            .revocation_date
            .is_some()
    );
}

#[tokio::test]
async fn partitioned_ca_without_partitions_keeps_the_legacy_crl() {
    let h = Harness::new(vec![partitioned_ca_config(1, 0)]).await;
    h.store
        .add_certificate(revoked("legacy", 1, NO_CRL_PARTITION, Some(Utc::now())))
        .await;

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        1
    );
    assert_eq!(serials(&h, NO_CRL_PARTITION).await, vec![serial_bytes(1)]);
}

#[tokio::test]
async fn retired_partitions_keep_receiving_crls() {
    let mut ca = partitioned_ca_config(1, 1);
    ca.retired_crl_partitions = 1;
    let h = Harness::new(vec![ca]).await;
    h.store
        .add_certificate(revoked("legacy", 1, NO_CRL_PARTITION, Some(Utc::now())))
        .await;

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        2
    );
    assert_eq!(serials(&h, NO_CRL_PARTITION).await, vec![serial_bytes(1)]);
}

#[tokio::test]
async fn sweeps_cover_retired_partitions() {
    let mut ca = partitioned_ca_config(1, 3);
    ca.retired_crl_partitions = 2;
    let h = Harness::new(vec![ca]).await;
    let an_hour_ago = Utc::now() - Duration::hours(1);
    h.store
        .add_certificate(revoked("retired", 1, 1, Some(an_hour_ago)))
        .await;
    h.store
        .add_certificate(revoked("active", 3, 3, Some(an_hour_ago)))
        .await;

    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        4
    );
    assert_eq!(serials(&h, 1).await, vec![serial_bytes(1)]);
    assert_eq!(serials(&h, 3).await, vec![serial_bytes(3)]);
    assert!(serials(&h, 2).await.is_empty());

    h.store.add_certificate(revoked("late", 2, 2, None)).await;
    assert_eq!(
        h.scheduler
            .create_delta_crls(None, Duration::zero())
            .await
            .unwrap(),
        4
    );
    let delta = h.last_crl(2).await;
    assert!(delta.is_delta);
    assert_eq!(serials(&h, 2).await, vec![serial_bytes(2)]);
}

#[tokio::test]
async fn expired_certificates_left_off_the_crl_are_archived() {
    let h = Harness::new(vec![ca_config(1, ISSUER)]).await;
    let mut unheld = revoked("unheld", 1, 0, Some(Utc::now() - Duration::days(90)));
    unheld.revocation_reason = RevocationReason::RemoveFromCrl;
    unheld.expire_date = Utc::now() - Duration::days(30);
    h.store.add_certificate(unheld).await;

    h.scheduler.force_crl(1).await.unwrap();
    h.scheduler.force_delta_crl(1).await.unwrap();
    h.scheduler.force_crl(1).await.unwrap();

    assert!(h.store.certificate("unheld").await.unwrap().archived);
    assert!(
        h.store
            .list_revoked(ISSUER, NO_CRL_PARTITION, None)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(serials(&h, NO_CRL_PARTITION).await.is_empty());
}

#[tokio::test]
async fn out_of_range_crl_period_fails_without_panicking() {
    let mut ca = ca_config(1, ISSUER);
    ca.crl_period = Duration::days(365 * 1_000_000);
    let mut delta_ca = ca_config(2, "CN=Delta CA");
    delta_ca.delta_crl_period = Duration::days(365 * 1_000_000);
    let h = Harness::new(vec![ca, delta_ca]).await;
    h.store.add_certificate(revoked("pending", 1, 0, None)).await;

    assert!(matches!(
        h.scheduler.force_crl(1).await,
        Err(CrlError::InvalidConfiguration { ca_id: 1, .. })
    ));
    assert!(matches!(
        h.scheduler.force_delta_crl(2).await,
        Err(CrlError::InvalidConfiguration { ca_id: 2, .. })
    ));

    // Only the base CRL of the second CA is valid
    assert_eq!(
        h.scheduler.create_crls(None, Duration::zero()).await.unwrap(),
        1
    );
    assert_eq!(h.store.crls().await.len(), 1);
    assert!(
        h.store
            .certificate("pending")
            .await
            .unwrap()
            .revocation_date
            .is_none()
    );
}

#[tokio::test]
async fn failed_mutation_rolls_back_the_crl() {
    let store = MemoryCaStore::new();
    store.add_ca(ca_config(1, ISSUER)).await;
    store.add_certificate(revoked("pending", 1, 0, None)).await;

    let mut certificates = MockCertificates::new();
    certificates
        .expect_set_revocation_date()
        .times(1)
        .returning(|_, _| Err(PersistenceError::Backend("disk full".to_string())));
    let mut queue = MockQueue::new();
    queue.expect_enqueue().times(0);
    queue.expect_remove().times(0);

    let signer = Arc::new(SoftwareCrlSigner::new());
    signer.register_key(ISSUER, CaSigningKey::generate(Curve::NistP256).unwrap());

    let ports = CrlPorts {
        unit_of_work: Arc::new(CompensatingUnitOfWork::new(
            Arc::new(store.clone()),
            Arc::new(certificates),
            Arc::new(queue),
        )),
        ..store.ports(signer.clone())
    };
    let generator = CrlGenerator::new(ports);

    let err = generator
        .generate_for(1, NO_CRL_PARTITION, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrlError::StoreError {
            ca_id: 1,
            cause: PersistenceError::Backend(_)
        }
    ));
    assert!(store.crls().await.is_empty());
    assert!(store.queue_entries().await.is_empty());
    assert!(
        store
            .certificate("pending")
            .await
            .unwrap()
            .revocation_date
            .is_none()
    );

    // The number is free again for the next attempt
    let crl = CrlGenerator::new(store.ports(signer))
        .generate_for(1, NO_CRL_PARTITION, false)
        .await
        .unwrap();
    assert_eq!(crl.crl_number, 1);
}

#[tokio::test]
async fn sweeps_respect_max_parallel_cas() {
    for limit in [1, 2] {
        let store = MemoryCaStore::new();
        let signer = TrackingSigner {
            inner: SoftwareCrlSigner::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        for ca_id in 1..=5 {
            let issuer = format!("CN=Parallel CA {ca_id}");
            signer
                .inner
                .register_key(issuer.clone(), CaSigningKey::generate(Curve::NistP256).unwrap());
            store.add_ca(ca_config(ca_id, &issuer)).await;
        }
        let signer = Arc::new(signer);

        let generator = Arc::new(CrlGenerator::new(store.ports(signer.clone())));
        let config = CrlSchedulerConfig {
            max_parallel_cas: limit,
            ..CrlSchedulerConfig::default()
        };
        let scheduler = CrlScheduler::new(config, generator);

        assert_eq!(
            scheduler.create_crls(None, Duration::zero()).await.unwrap(),
            5
        );
        assert_eq!(signer.peak.load(Ordering::SeqCst), limit);
        assert_eq!(signer.in_flight.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn registry_failure_is_not_blamed_on_a_ca() {
    let store = MemoryCaStore::new();
    let mut registry = MockRegistry::new();
    registry
        .expect_list_ca_ids()
        .times(1)
        .returning(|| Err(PersistenceError::Backend("registry down".to_string())));

    let ports = CrlPorts {
        registry: Arc::new(registry),
        ..store.ports(Arc::new(SoftwareCrlSigner::new()))
    };
    let scheduler = CrlScheduler::new(
        CrlSchedulerConfig::default(),
        Arc::new(CrlGenerator::new(ports)),
    );

    let err = scheduler
        .create_crls(None, Duration::zero())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrlError::Registry(PersistenceError::Backend(_))
    ));
    assert!(err.is_retryable());
}
