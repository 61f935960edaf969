//! Scenario fixtures and their per-run rendering.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::SecretSpec;
use crate::config::{HarnessConfig, Validate, ValidationResult};
use crate::env::ProviderConfig;
use crate::error::{Error, Result};
use crate::naming::RunId;
use crate::provider::{ChangeRequest, ProviderKind, TriggerFile};

/// Provider event used to trigger the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Push a branch and open a pull/merge request from it.
    #[default]
    PullRequest,
    /// Push a branch only.
    Push,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::PullRequest => "pull_request",
            TriggerEvent::Push => "push",
        }
    }
}

/// A scenario fixture, usually loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub provider: ProviderKind,

    /// Deliver events through a repository webhook instead of a registered app.
    #[serde(default)]
    pub direct_webhook: bool,

    #[serde(default)]
    pub event: TriggerEvent,

    /// Files committed to the trigger branch, keyed by repository path.
    ///
    /// Contents may use `{{ namespace }}`, `{{ branch }}`, `{{ base_branch }}`
    /// and `{{ event }}` placeholders.
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    /// Secrets created next to the provider credentials secret.
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,

    /// Observation bound in seconds; defaults to the harness setting.
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default = "default_expected_runs")]
    pub expected_runs: usize,
}

fn default_expected_runs() -> usize {
    1
}

impl ScenarioSpec {
    /// Loads a fixture from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let spec: ScenarioSpec = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse scenario: {}", e)))?;
        spec.validate().into_result()?;
        Ok(spec)
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl Validate for ScenarioSpec {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.name.trim().is_empty() {
            result.add_error("scenario name cannot be empty");
        }
        if self.files.is_empty() {
            result.add_error(format!(
                "scenario '{}' has no files to push, nothing would trigger",
                self.name
            ));
        }
        if self.timeout == Some(0) {
            result.add_error("timeout must be greater than zero");
        }
        if self.expected_runs == 0 {
            result.add_error("expected_runs must be at least 1");
        }
        if self.direct_webhook && self.provider != ProviderKind::GitHub {
            result.add_warning(format!(
                "direct_webhook only changes key resolution for github, ignored for {}",
                self.provider
            ));
        }
        for secret in &self.secrets {
            if secret.name.trim().is_empty() {
                result.add_error("secret name cannot be empty");
            }
        }

        result
    }
}

/// A scenario rendered for one run: names resolved, templates expanded.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub event: TriggerEvent,
    pub namespace: String,
    pub branch: String,
    pub base_branch: String,
    pub files: Vec<TriggerFile>,
    pub secrets: Vec<SecretSpec>,
    pub observe_timeout: Option<Duration>,
    pub expected_runs: usize,
}

impl ScenarioPlan {
    /// Renders `spec` for `run_id`.
    ///
    /// When `provider` is given its credentials become the first secret.
    pub fn render(
        spec: &ScenarioSpec,
        run_id: &RunId,
        config: &HarnessConfig,
        provider: Option<&ProviderConfig>,
    ) -> Self {
        let namespace = run_id.namespace_name();
        let branch = run_id.branch_name();
        let substitute = |text: &str| {
            text.replace("{{ namespace }}", &namespace)
                .replace("{{ branch }}", &branch)
                .replace("{{ base_branch }}", &config.main_branch)
                .replace("{{ event }}", spec.event.as_str())
        };

        let files = spec
            .files
            .iter()
            .map(|(path, content)| TriggerFile {
                path: path.clone(),
                content: substitute(content),
            })
            .collect();

        let mut secrets = Vec::new();
        if let Some(provider) = provider {
            secrets.push(SecretSpec::new(
                config.secret_name.clone(),
                provider.secret_data(),
            ));
        }
        secrets.extend(spec.secrets.iter().cloned());

        Self {
            name: spec.name.clone(),
            event: spec.event,
            namespace,
            branch,
            base_branch: config.main_branch.clone(),
            files,
            secrets,
            observe_timeout: spec.timeout_duration(),
            expected_runs: spec.expected_runs,
        }
    }

    pub fn commit_message(&self) -> String {
        format!("pac-e2e: {} ({})", self.name, self.branch)
    }

    /// The change to open for pull-request scenarios.
    pub fn change_request(&self) -> Option<ChangeRequest> {
        match self.event {
            TriggerEvent::PullRequest => Some(ChangeRequest {
                title: format!("pac-e2e: {}", self.name),
                body: format!(
                    "Opened by the end-to-end harness. Namespace: `{}`.",
                    self.namespace
                ),
                head: self.branch.clone(),
                base: self.base_branch.clone(),
            }),
            TriggerEvent::Push => None,
        }
    }
}
