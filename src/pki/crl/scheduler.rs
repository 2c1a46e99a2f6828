use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration as TokioDuration, interval};
use tracing::{debug, error, info, warn};

use super::errors::{CrlError, CrlResult};
use super::generator::CrlGenerator;
use super::types::{CaConfig, CaId, CaStatus, CrlDescriptor};

/// Configuration for CRL scheduler
#[derive(Debug, Clone)]
pub struct CrlSchedulerConfig {
    /// How often to check CRLs (in seconds)
    pub check_interval_secs: u64,
    /// Number of CAs swept concurrently
    pub max_parallel_cas: usize,
    /// Overlap used by the periodic delta sweep
    pub delta_overlap: Duration,
}

impl Default for CrlSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            max_parallel_cas: 4,
            delta_overlap: Duration::zero(),
        }
    }
}

/// Whether a new base CRL is needed.
///
/// With an issue interval configured, a CRL is reissued at
/// `created + interval` when that comes before the regular expiry window,
/// ignoring the overlap.
pub fn base_crl_due(
    last_base: Option<&CrlDescriptor>,
    ca: &CaConfig,
    overlap_addend: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_base) = last_base else {
        return true;
    };

    let mut next_update = last_base.expire_date;
    let mut overlap = ca
        .crl_overlap_time
        .checked_add(&overlap_addend)
        .unwrap_or(if overlap_addend > Duration::zero() {
            Duration::MAX
        } else {
            Duration::MIN
        });
    if ca.crl_issue_interval > Duration::zero()
        && let Some(candidate) = last_base.create_date.checked_add_signed(ca.crl_issue_interval)
        && !reaches(candidate, overlap, next_update)
    {
        next_update = candidate;
        overlap = Duration::zero();
    }
    reaches(now, overlap, next_update)
}

/// Whether a new delta CRL is needed on top of `last_base`
pub fn delta_crl_due(
    last_delta: Option<&CrlDescriptor>,
    last_base: &CrlDescriptor,
    overlap: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_delta {
        None => true,
        // Linked to a superseded base
        Some(delta) if delta.base_crl_number != Some(last_base.crl_number) => true,
        Some(delta) => reaches(now, overlap, delta.expire_date),
    }
}

/// `at + overlap >= deadline`, saturating at the ends of the date range
fn reaches(at: DateTime<Utc>, overlap: Duration, deadline: DateTime<Utc>) -> bool {
    match at.checked_add_signed(overlap) {
        Some(horizon) => horizon >= deadline,
        None => overlap > Duration::zero(),
    }
}

/// Scheduler deciding when base and delta CRLs are reissued
pub struct CrlScheduler {
    config: CrlSchedulerConfig,
    generator: Arc<CrlGenerator>,
    permits: Arc<Semaphore>,
}

impl CrlScheduler {
    /// Create a new CRL scheduler
    pub fn new(config: CrlSchedulerConfig, generator: Arc<CrlGenerator>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_cas.max(1)));
        Self {
            config,
            generator,
            permits,
        }
    }

    /// Issue base CRLs that are due, returning how many were generated.
    ///
    /// `overlap_addend` widens every CA's overlap window, so CRLs close to
    /// expiry are reissued early.
    pub async fn create_crls(
        &self,
        ca_ids: Option<&[CaId]>,
        overlap_addend: Duration,
    ) -> CrlResult<usize> {
        let cas = self.select_cas(ca_ids).await?;
        Ok(self.sweep(cas, false, overlap_addend).await)
    }

    /// Issue delta CRLs that are due, returning how many were generated
    pub async fn create_delta_crls(
        &self,
        ca_ids: Option<&[CaId]>,
        overlap: Duration,
    ) -> CrlResult<usize> {
        let cas = self
            .select_cas(ca_ids)
            .await?
            .into_iter()
            .filter(CaConfig::deltas_enabled)
            .collect();
        Ok(self.sweep(cas, true, overlap).await)
    }

    /// Issue a base CRL for every partition of a CA, due or not
    pub async fn force_crl(&self, ca_id: CaId) -> CrlResult<usize> {
        self.force(ca_id, false).await
    }

    /// Issue a delta CRL for every partition of a CA, due or not
    pub async fn force_delta_crl(&self, ca_id: CaId) -> CrlResult<usize> {
        self.force(ca_id, true).await
    }

    async fn force(&self, ca_id: CaId, is_delta: bool) -> CrlResult<usize> {
        let ca = self.generator.resolve_ca(ca_id).await?;
        let mut issued = 0;
        for partition_index in ca.partition_indexes() {
            self.generator
                .generate(&ca, partition_index, is_delta)
                .await?;
            issued += 1;
        }
        info!("Forced {} CRLs for CA {}", issued, ca_id);
        Ok(issued)
    }

    /// Run one base and one delta sweep over all CAs
    pub async fn trigger_immediate_update(&self) -> CrlResult<usize> {
        debug!("Performing immediate CRL check");
        let base = self.create_crls(None, Duration::zero()).await?;
        let delta = self
            .create_delta_crls(None, self.config.delta_overlap)
            .await?;
        Ok(base + delta)
    }

    /// Start the scheduler (spawns background task)
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let check_interval = TokioDuration::from_secs(self.config.check_interval_secs.max(1));
        debug!(
            "Starting CRL scheduler with interval of {} seconds",
            self.config.check_interval_secs
        );

        let scheduler = Arc::new(self);

        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.tick().await; // First tick completes immediately

            loop {
                ticker.tick().await;
                debug!("Running scheduled CRL check");

                match scheduler.trigger_immediate_update().await {
                    Ok(issued) if issued > 0 => info!("Scheduled CRL check issued {} CRLs", issued),
                    Ok(_) => debug!("Scheduled CRL check: all CRLs up to date"),
                    Err(e) => error!("Scheduled CRL check failed: {}", e),
                }
            }
        })
    }

    async fn select_cas(&self, ca_ids: Option<&[CaId]>) -> CrlResult<Vec<CaConfig>> {
        let cas = match ca_ids {
            // Every requested CA must exist before any work starts
            Some(ca_ids) => {
                let mut cas = Vec::with_capacity(ca_ids.len());
                for &ca_id in ca_ids {
                    cas.push(self.generator.resolve_ca(ca_id).await?);
                }
                cas
            }
            None => {
                let ca_ids = self
                    .generator
                    .registry()
                    .list_ca_ids()
                    .await
                    .map_err(CrlError::Registry)?;
                let mut cas = Vec::with_capacity(ca_ids.len());
                for ca_id in ca_ids {
                    match self.generator.resolve_ca(ca_id).await {
                        Ok(ca) => cas.push(ca),
                        Err(e) => warn!("Skipping CA {}: {}", ca_id, e),
                    }
                }
                cas
            }
        };

        Ok(cas
            .into_iter()
            .filter(|ca| match ca.status {
                CaStatus::Active | CaStatus::Expired => true,
                CaStatus::Offline => {
                    error!("CA {} is offline, skipping CRL generation", ca.ca_id);
                    false
                }
                CaStatus::External | CaStatus::Uninitialized => {
                    debug!("CA {} does not issue CRLs locally", ca.ca_id);
                    false
                }
            })
            .collect())
    }

    async fn sweep(&self, cas: Vec<CaConfig>, is_delta: bool, overlap: Duration) -> usize {
        let mut tasks = JoinSet::new();
        for ca in cas {
            let generator = Arc::clone(&self.generator);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return 0;
                };
                sweep_ca(&generator, &ca, is_delta, overlap).await
            });
        }

        let mut issued = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(count) => issued += count,
                Err(e) => error!("CRL sweep task failed: {}", e),
            }
        }

        debug!(
            "{} sweep issued {} CRLs",
            if is_delta { "Delta" } else { "Base" },
            issued
        );
        issued
    }
}

/// Sweep the partitions of one CA in order, returning how many CRLs were issued
async fn sweep_ca(
    generator: &CrlGenerator,
    ca: &CaConfig,
    is_delta: bool,
    overlap: Duration,
) -> usize {
    let mut issued = 0;
    for partition_index in ca.partition_indexes() {
        let now = Utc::now();
        let result = generator
            .generate_if_due(ca, partition_index, is_delta, |last_base, last_delta| {
                if !is_delta {
                    return base_crl_due(last_base, ca, overlap, now);
                }
                match last_base {
                    Some(base) => delta_crl_due(last_delta, base, overlap, now),
                    None => {
                        debug!(
                            "No base CRL for CA {} partition {} yet, skipping delta",
                            ca.ca_id, partition_index
                        );
                        false
                    }
                }
            })
            .await;

        match result {
            Ok(Some(_)) => issued += 1,
            Ok(None) => {}
            Err(e @ CrlError::TokenOffline { .. }) => {
                warn!("CA {} partition {}: {}", ca.ca_id, partition_index, e)
            }
            Err(e) => error!(
                "Failed to generate CRL for CA {} partition {}: {}",
                ca.ca_id, partition_index, e
            ),
        }
    }
    issued
}
