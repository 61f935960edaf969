//! pac-e2e - ephemeral-resource harness for webhook-triggered pipelines
//!
//! This library provisions a disposable environment (a git branch and change
//! on a hosting provider plus a cluster namespace with secrets), triggers the
//! system under test through real provider events, observes the reaction
//! within a bounded timeout, and tears down everything it created whatever
//! the outcome.

pub mod cluster;
pub mod config;
pub mod env;
pub mod error;
pub mod naming;
pub mod observe;
pub mod provider;
pub mod scenario;
pub mod teardown;

pub use error::{Error, Result};
pub use naming::RunId;

pub use cluster::{
    ClusterProvisioner, EphemeralNamespace, KubeProvisioner, SecretSpec, MANAGED_BY_LABEL,
};
pub use config::{HarnessConfig, Validate, ValidationResult};
pub use env::{
    resolve, resolve_provider, split_org_repo, EnvSource, ProcessEnv, ProviderConfig,
    ScenarioTarget,
};
pub use observe::{
    observe, Observation, ObservationContext, Observer, PipelineRunObserver, PollPolicy,
};
pub use provider::{
    authenticate, ChangeRequest, Credential, ProviderAdapter, ProviderKind, ProviderSession,
    TriggerFile,
};
pub use scenario::{
    run_scenario, ScenarioDriver, ScenarioOutcome, ScenarioPlan, ScenarioSpec, ScenarioStatus,
    Stage, TriggerEvent, Verdict,
};
pub use teardown::{
    Removal, TeardownAction, TeardownCoordinator, TeardownEntry, TeardownGuard, TeardownOutcome,
    TeardownReport, TriggerHandle,
};
