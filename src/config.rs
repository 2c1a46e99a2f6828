use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::Duration;
use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::CaSigningKey;
use crate::pki::crl::{CaConfig, CaId, CaStatus, CrlSchedulerConfig, PublisherId};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub cas: Vec<CaSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub check_interval_secs: u64,
    pub max_parallel_cas: usize,
    pub signing_timeout_secs: u64,
    pub delta_overlap_ms: i64,
}

impl SchedulerSettings {
    pub fn scheduler_config(&self) -> CrlSchedulerConfig {
        CrlSchedulerConfig {
            check_interval_secs: self.check_interval_secs,
            max_parallel_cas: self.max_parallel_cas,
            delta_overlap: Duration::milliseconds(self.delta_overlap_ms),
        }
    }

    pub fn signing_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.signing_timeout_secs)
    }
}

/// CA revocation policy as written in the settings file.
///
/// All periods are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaSettings {
    pub ca_id: CaId,
    pub issuer_dn: String,
    #[serde(default = "default_status")]
    pub status: CaStatus,
    pub crl_period_ms: i64,
    #[serde(default)]
    pub crl_issue_interval_ms: i64,
    #[serde(default)]
    pub crl_overlap_time_ms: i64,
    #[serde(default)]
    pub delta_crl_period_ms: i64,
    #[serde(default)]
    pub use_partitioned_crl: bool,
    #[serde(default)]
    pub crl_partitions: u32,
    #[serde(default)]
    pub retired_crl_partitions: u32,
    #[serde(default)]
    pub default_crl_dist_point: String,
    #[serde(default)]
    pub ca_defined_freshest_crl: String,
    #[serde(default)]
    pub crl_distribution_point_on_crl_critical: bool,
    #[serde(default)]
    pub crl_publishers: Vec<PublisherId>,
    /// PKCS#8 PEM file holding the CA signing key
    #[serde(default)]
    pub signing_key_path: Option<String>,
}

fn default_status() -> CaStatus {
    CaStatus::Active
}

impl CaSettings {
    /// Read the configured signing key, `None` when no key file is set
    pub fn load_signing_key(&self) -> Result<Option<CaSigningKey>, ConfigError> {
        let Some(path) = &self.signing_key_path else {
            return Ok(None);
        };
        let pem = std::fs::read(path).map_err(|e| {
            ConfigError::Message(format!("CA {}: cannot read {path}: {e}", self.ca_id))
        })?;
        CaSigningKey::from_pkcs8_pem(pem).map(Some).map_err(|e| {
            ConfigError::Message(format!("CA {}: invalid key {path}: {e}", self.ca_id))
        })
    }
}

fn millis(value: i64) -> Result<Duration, ConfigError> {
    Duration::try_milliseconds(value)
        .ok_or_else(|| ConfigError::Message(format!("{value} ms is out of range")))
}

impl TryFrom<CaSettings> for CaConfig {
    type Error = ConfigError;

    fn try_from(settings: CaSettings) -> Result<Self, Self::Error> {
        let ca = CaConfig {
            ca_id: settings.ca_id,
            issuer_dn: settings.issuer_dn,
            status: settings.status,
            crl_period: millis(settings.crl_period_ms)?,
            crl_issue_interval: millis(settings.crl_issue_interval_ms)?,
            crl_overlap_time: millis(settings.crl_overlap_time_ms)?,
            delta_crl_period: millis(settings.delta_crl_period_ms)?,
            use_partitioned_crl: settings.use_partitioned_crl,
            crl_partitions: settings.crl_partitions,
            retired_crl_partitions: settings.retired_crl_partitions,
            default_crl_dist_point: settings.default_crl_dist_point,
            ca_defined_freshest_crl: settings.ca_defined_freshest_crl,
            crl_distribution_point_on_crl_critical: settings
                .crl_distribution_point_on_crl_critical,
            crl_publishers: settings.crl_publishers,
        };
        ca.check_periods()
            .map_err(|reason| ConfigError::Message(format!("CA {}: {reason}", ca.ca_id)))?;
        for warning in ca.partition_warnings() {
            warn!("CA {}: {}", ca.ca_id, warning);
        }
        Ok(ca)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("scheduler.check_interval_secs", 60)?
            .set_default("scheduler.max_parallel_cas", 4)?
            .set_default("scheduler.signing_timeout_secs", 30)?
            .set_default("scheduler.delta_overlap_ms", 0)?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format CRL_SCHEDULER__CHECK_INTERVAL_SECS
            builder = builder.add_source(
                Environment::with_prefix("CRL")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
