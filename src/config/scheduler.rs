//! Scheduler and quota account configuration structures.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;
use crate::util::types::{AccountId, Priority};

/// Environment variable naming the JSON config file read by [`SchedulerConfig::from_env`].
pub const CONFIG_PATH_ENV: &str = "QUOTA_SCHEDULER_CONFIG";

/// Default number of funded priority tiers.
pub const DEFAULT_PRIORITIES: usize = 3;

/// Default balance (in worker-seconds) above which running tasks may be promoted.
pub const DEFAULT_PROMOTE_THRESHOLD: f64 = 5.0 * 60.0;

/// Default balance below which running tasks may be demoted.
pub const DEFAULT_DEMOTE_THRESHOLD: f64 = -DEFAULT_PROMOTE_THRESHOLD;

/// Per-account quota policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Quota recharge per tier, in worker-seconds per second.
    #[serde(default)]
    pub charge_rate: Vec<f64>,
    /// Balance saturates at `charge_rate[p] * max_charge_seconds`.
    #[serde(default)]
    pub max_charge_seconds: f64,
    /// Maximum concurrent funded runs; 0 means unlimited.
    #[serde(default)]
    pub max_fanout: u32,
    /// Keep this account's requests out of the free bucket.
    #[serde(default)]
    pub disable_free_tasks: bool,
}

impl AccountConfig {
    /// Account config with the given recharge policy.
    #[must_use]
    pub const fn new(charge_rate: Vec<f64>, max_charge_seconds: f64, max_fanout: u32) -> Self {
        Self {
            charge_rate,
            max_charge_seconds,
            max_fanout,
            disable_free_tasks: false,
        }
    }

    /// Recharge rate at `priority`, zero if unset.
    #[must_use]
    pub fn rate_at(&self, priority: Priority) -> f64 {
        self.charge_rate.get(priority).copied().unwrap_or(0.0)
    }

    /// Validate account policy values.
    pub fn validate(&self, priorities: usize) -> Result<(), String> {
        if self.charge_rate.len() > priorities {
            return Err(format!(
                "charge_rate has {} tiers but only {priorities} are configured",
                self.charge_rate.len()
            ));
        }
        if self.charge_rate.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err("charge_rate values must be finite and non-negative".into());
        }
        if !self.max_charge_seconds.is_finite() || self.max_charge_seconds < 0.0 {
            return Err("max_charge_seconds must be finite and non-negative".into());
        }
        Ok(())
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of funded tiers; tier `priorities` is the free bucket.
    #[serde(default = "default_priorities")]
    pub priorities: usize,
    /// Turn off the preemption step of each pass.
    #[serde(default)]
    pub disable_preemption: bool,
    /// Balance above which running tasks may be promoted into a tier.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: f64,
    /// Balance below which running tasks may be demoted out of a tier.
    #[serde(default = "default_demote_threshold")]
    pub demote_threshold: f64,
    /// Map of account id to quota policy.
    #[serde(default)]
    pub accounts: BTreeMap<AccountId, AccountConfig>,
}

const fn default_priorities() -> usize {
    DEFAULT_PRIORITIES
}

const fn default_promote_threshold() -> f64 {
    DEFAULT_PROMOTE_THRESHOLD
}

const fn default_demote_threshold() -> f64 {
    DEFAULT_DEMOTE_THRESHOLD
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::with_priorities(DEFAULT_PRIORITIES)
    }
}

impl SchedulerConfig {
    /// Empty config with `priorities` funded tiers and default thresholds.
    #[must_use]
    pub const fn with_priorities(priorities: usize) -> Self {
        Self {
            priorities,
            disable_preemption: false,
            promote_threshold: DEFAULT_PROMOTE_THRESHOLD,
            demote_threshold: DEFAULT_DEMOTE_THRESHOLD,
            accounts: BTreeMap::new(),
        }
    }

    /// The best-effort tier.
    #[must_use]
    pub const fn free_bucket(&self) -> Priority {
        self.priorities
    }

    /// Validate thresholds and every account.
    pub fn validate(&self) -> Result<(), String> {
        if self.priorities == 0 {
            return Err("priorities must be greater than 0".into());
        }
        if !self.promote_threshold.is_finite() || !self.demote_threshold.is_finite() {
            return Err("thresholds must be finite".into());
        }
        if self.demote_threshold > self.promote_threshold {
            return Err("demote_threshold must not exceed promote_threshold".into());
        }
        for (name, account) in &self.accounts {
            account
                .validate(self.priorities)
                .map_err(|e| format!("account `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scheduler config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(|e| anyhow::anyhow!("scheduler config {}: {e}", path.display()))
    }

    /// Load `.env` if present, then read the file named by [`CONFIG_PATH_ENV`].
    ///
    /// Falls back to [`SchedulerConfig::default`] when the variable is unset.
    pub fn from_env() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(anyhow::Error::new(e).context("loading .env"));
            }
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => {
                tracing::info!("{CONFIG_PATH_ENV} unset, using default scheduler config");
                Ok(Self::default())
            }
        }
    }
}
