//! Guaranteed teardown of scenario resources.
//!
//! The [`TeardownCoordinator`] reverses whatever a scenario created, in a
//! fixed order, attempting every action exactly once and collecting failures
//! into a [`TeardownReport`]. The [`TeardownGuard`] binds that teardown to the
//! scenario's scope so it still runs when setup fails, the observation panics,
//! or the scenario future is dropped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterProvisioner, EphemeralNamespace};
use crate::env::ScenarioTarget;
use crate::provider::ProviderAdapter;

/// Result of a delete-like action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// The resource existed and was removed.
    Removed,
    /// Nothing to remove.
    AlreadyAbsent,
}

/// Identifies the provider-side event a scenario created.
///
/// The change and the ref are reversed independently: a push trigger has a
/// ref but no change, and a failed change creation still leaves a ref.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerHandle {
    /// Pull/merge request number; `None` when none was opened.
    pub change: Option<u64>,
    /// Branch created for the trigger; `None` when none was created.
    pub ref_name: Option<String>,
}

impl TriggerHandle {
    pub fn is_empty(&self) -> bool {
        self.change.is_none() && self.ref_name.is_none()
    }
}

/// Cleanup actions, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownAction {
    CloseChange,
    DeleteNamespace,
    DeleteRef,
}

impl fmt::Display for TeardownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownAction::CloseChange => "close change",
            TeardownAction::DeleteNamespace => "delete namespace",
            TeardownAction::DeleteRef => "delete ref",
        };
        f.write_str(name)
    }
}

/// Outcome of one teardown action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum TeardownOutcome {
    Done,
    AlreadyAbsent,
    /// The resource was never created.
    Skipped,
    Failed(String),
}

impl From<Removal> for TeardownOutcome {
    fn from(removal: Removal) -> Self {
        match removal {
            Removal::Removed => TeardownOutcome::Done,
            Removal::AlreadyAbsent => TeardownOutcome::AlreadyAbsent,
        }
    }
}

/// One entry in a [`TeardownReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownEntry {
    pub action: TeardownAction,
    /// What the action targeted (change number, namespace, ref name).
    pub subject: Option<String>,
    pub outcome: TeardownOutcome,
}

/// Aggregate result of every teardown action for a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    fn record(
        &mut self,
        action: TeardownAction,
        subject: Option<String>,
        outcome: TeardownOutcome,
    ) {
        match &outcome {
            TeardownOutcome::Failed(error) => tracing::error!(
                action = %action,
                subject = ?subject,
                error = %error,
                "teardown action failed"
            ),
            other => tracing::info!(
                action = %action,
                subject = ?subject,
                outcome = ?other,
                "teardown action finished"
            ),
        }
        self.entries.push(TeardownEntry {
            action,
            subject,
            outcome,
        });
    }

    /// Failed entries. A non-empty set means the environment was left dirty.
    pub fn failures(&self) -> impl Iterator<Item = &TeardownEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TeardownOutcome::Failed(_)))
    }

    /// True when no action failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Outcome of a given action, if it was recorded.
    pub fn outcome(&self, action: TeardownAction) -> Option<&TeardownOutcome> {
        self.entries
            .iter()
            .find(|e| e.action == action)
            .map(|e| &e.outcome)
    }
}

/// Reverses scenario resources through the provider and cluster.
#[derive(Clone)]
pub struct TeardownCoordinator {
    adapter: Arc<dyn ProviderAdapter>,
    cluster: Arc<dyn ClusterProvisioner>,
}

impl TeardownCoordinator {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, cluster: Arc<dyn ClusterProvisioner>) -> Self {
        Self { adapter, cluster }
    }

    /// Runs every applicable action: close change, delete namespace, delete ref.
    ///
    /// Each action runs regardless of earlier failures. Safe to call again with
    /// the same handles; repeated removals report `AlreadyAbsent`.
    pub async fn teardown(
        &self,
        target: &ScenarioTarget,
        handle: &TriggerHandle,
        namespace: Option<&EphemeralNamespace>,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        match handle.change {
            Some(number) => {
                tracing::info!(change = number, repo = %target.full_name(), "closing change");
                let outcome = self.adapter.close_change(target, number).await;
                report.record(
                    TeardownAction::CloseChange,
                    Some(number.to_string()),
                    into_outcome(outcome),
                );
            }
            None => report.record(TeardownAction::CloseChange, None, TeardownOutcome::Skipped),
        }

        match namespace {
            Some(ns) => {
                let outcome = self.cluster.delete_namespace(&ns.name).await;
                report.record(
                    TeardownAction::DeleteNamespace,
                    Some(ns.name.clone()),
                    into_outcome(outcome),
                );
            }
            None => report.record(
                TeardownAction::DeleteNamespace,
                None,
                TeardownOutcome::Skipped,
            ),
        }

        match &handle.ref_name {
            Some(name) => {
                tracing::info!(git_ref = %name, repo = %target.full_name(), "deleting ref");
                let outcome = self.adapter.delete_ref(target, name).await;
                report.record(
                    TeardownAction::DeleteRef,
                    Some(name.clone()),
                    into_outcome(outcome),
                );
            }
            None => report.record(TeardownAction::DeleteRef, None, TeardownOutcome::Skipped),
        }

        report
    }
}

fn into_outcome(result: crate::error::Result<Removal>) -> TeardownOutcome {
    match result {
        Ok(removal) => removal.into(),
        Err(err) => TeardownOutcome::Failed(err.to_string()),
    }
}

/// Scoped ownership of everything a scenario created.
///
/// Setup steps record resources as soon as they exist. [`TeardownGuard::release`]
/// tears them down and returns the report. A guard dropped without release
/// schedules the same teardown on the current tokio runtime.
pub struct TeardownGuard {
    coordinator: Option<TeardownCoordinator>,
    target: ScenarioTarget,
    handle: TriggerHandle,
    namespace: Option<EphemeralNamespace>,
}

impl TeardownGuard {
    pub fn new(coordinator: TeardownCoordinator, target: ScenarioTarget) -> Self {
        Self {
            coordinator: Some(coordinator),
            target,
            handle: TriggerHandle::default(),
            namespace: None,
        }
    }

    pub fn record_namespace(&mut self, namespace: EphemeralNamespace) {
        self.namespace = Some(namespace);
    }

    /// Notes a secret created inside the recorded namespace.
    pub fn record_secret(&mut self, name: &str) {
        if let Some(ns) = self.namespace.as_mut() {
            ns.secrets.push(name.to_string());
        }
    }

    pub fn record_ref(&mut self, name: impl Into<String>) {
        self.handle.ref_name = Some(name.into());
    }

    pub fn record_change(&mut self, number: u64) {
        self.handle.change = Some(number);
    }

    pub fn handle(&self) -> &TriggerHandle {
        &self.handle
    }

    pub fn namespace(&self) -> Option<&EphemeralNamespace> {
        self.namespace.as_ref()
    }

    /// Tears down every recorded resource.
    pub async fn release(mut self) -> TeardownReport {
        match self.coordinator.take() {
            Some(coordinator) => {
                coordinator
                    .teardown(&self.target, &self.handle, self.namespace.as_ref())
                    .await
            }
            None => TeardownReport::default(),
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        if self.handle.is_empty() && self.namespace.is_none() {
            return;
        }

        let target = self.target.clone();
        let handle = std::mem::take(&mut self.handle);
        let namespace = self.namespace.take();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    namespace = ?namespace.as_ref().map(|ns| ns.name.as_str()),
                    handle = ?handle,
                    "scenario dropped before teardown, scheduling cleanup"
                );
                runtime.spawn(async move {
                    let report = coordinator
                        .teardown(&target, &handle, namespace.as_ref())
                        .await;
                    if !report.is_clean() {
                        tracing::error!(
                            report = ?report,
                            "deferred teardown left resources behind"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    namespace = ?namespace.as_ref().map(|ns| ns.name.as_str()),
                    handle = ?handle,
                    "scenario dropped outside a runtime, resources may be orphaned"
                );
            }
        }
    }
}
