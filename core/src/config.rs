//! Harness configuration and validation.
//!
//! Settings are read from an optional TOML file; every field has a default so
//! an empty file (or no file) yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::DEFAULT_MANAGED_BY;
use crate::error::{Error, Result};
use crate::observe::PollPolicy;

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing with every error joined.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

/// Settings shared by every scenario in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Branch trigger branches are cut from and changes target.
    pub main_branch: String,
    /// Bound on the observe step, in seconds.
    pub observe_timeout_secs: u64,
    /// First delay between observation polls, in seconds.
    pub poll_interval_secs: u64,
    /// Maximum delay between observation polls, in seconds.
    pub poll_max_interval_secs: u64,
    /// Value of the managed-by label on cluster objects.
    pub managed_by: String,
    /// Name of the secret holding provider credentials in each namespace.
    pub secret_name: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            main_branch: "main".to_string(),
            observe_timeout_secs: 600,
            poll_interval_secs: 5,
            poll_max_interval_secs: 30,
            managed_by: DEFAULT_MANAGED_BY.to_string(),
            secret_name: "pac-e2e-provider".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: HarnessConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse harness config: {}", e)))?;
        for warning in config.validate().into_result()? {
            tracing::warn!(warning = %warning, "harness config");
        }
        Ok(config)
    }

    /// Polling policy for the observe step, optionally overriding the bound.
    pub fn poll_policy(&self, timeout_override: Option<Duration>) -> PollPolicy {
        PollPolicy {
            timeout: timeout_override.unwrap_or(Duration::from_secs(self.observe_timeout_secs)),
            initial_interval: Duration::from_secs(self.poll_interval_secs),
            max_interval: Duration::from_secs(self.poll_max_interval_secs),
        }
    }
}

impl Validate for HarnessConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.main_branch.trim().is_empty() {
            result.add_error("main_branch cannot be empty");
        }
        if self.managed_by.trim().is_empty() {
            result.add_error("managed_by cannot be empty");
        }
        if self.secret_name.trim().is_empty() {
            result.add_error("secret_name cannot be empty");
        }
        if self.observe_timeout_secs == 0 {
            result.add_error("observe_timeout_secs must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            result.add_error("poll_interval_secs must be greater than zero");
        }
        if self.poll_max_interval_secs < self.poll_interval_secs {
            result.add_error("poll_max_interval_secs must not be less than poll_interval_secs");
        }

        if self.observe_timeout_secs > 3600 {
            result.add_warning("observe_timeout_secs over 1 hour may hide a stuck pipeline");
        }
        if self.poll_max_interval_secs >= self.observe_timeout_secs {
            result.add_warning("poll_max_interval_secs leaves room for at most one poll");
        }

        result
    }
}
