//! In-memory provider, cluster and observer doubles for lifecycle tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use pac_e2e::cluster::{ClusterProvisioner, SecretSpec};
use pac_e2e::env::ScenarioTarget;
use pac_e2e::observe::{Observation, ObservationContext, Observer};
use pac_e2e::provider::{
    ChangeRequest, Credential, ProviderAdapter, ProviderKind, ProviderSession, TriggerFile,
};
use pac_e2e::teardown::Removal;
use pac_e2e::{Error, Result};

#[derive(Default)]
struct ProviderState {
    branches: BTreeSet<String>,
    open_changes: BTreeSet<u64>,
    pushed: Vec<TriggerFile>,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
}

/// Provider double that keeps branches and changes in memory.
pub struct FakeProvider {
    session: ProviderSession,
    next_change: u64,
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub fn new(next_change: u64) -> Self {
        Self {
            session: ProviderSession {
                kind: ProviderKind::GitHub,
                api_url: "https://api.fake.test".to_string(),
                credential: Credential::new("fake-token"),
                user: "e2e-bot".to_string(),
            },
            next_change,
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// Makes every later call to `operation` fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn branches(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().branches.clone()
    }

    pub fn open_changes(&self) -> BTreeSet<u64> {
        self.state.lock().unwrap().open_changes.clone()
    }

    pub fn pushed(&self) -> Vec<TriggerFile> {
        self.state.lock().unwrap().pushed.clone()
    }

    fn enter(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, ProviderState>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;
        if state.failing.contains(operation) {
            return Err(Error::Provider {
                provider: ProviderKind::GitHub,
                operation,
                status: Some(500),
                reason: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn session(&self) -> &ProviderSession {
        &self.session
    }

    async fn create_branch(&self, _target: &ScenarioTarget, name: &str, _from: &str) -> Result<()> {
        let mut state = self.enter("create_branch")?;
        state.branches.insert(name.to_string());
        Ok(())
    }

    async fn push_files(
        &self,
        _target: &ScenarioTarget,
        branch: &str,
        files: &[TriggerFile],
        _message: &str,
    ) -> Result<()> {
        let mut state = self.enter("push_files")?;
        assert!(state.branches.contains(branch), "push to unknown branch {branch}");
        state.pushed.extend(files.iter().cloned());
        Ok(())
    }

    async fn open_change(&self, _target: &ScenarioTarget, request: &ChangeRequest) -> Result<u64> {
        let mut state = self.enter("open_change")?;
        assert!(state.branches.contains(&request.head));
        state.open_changes.insert(self.next_change);
        Ok(self.next_change)
    }

    async fn close_change(&self, _target: &ScenarioTarget, number: u64) -> Result<Removal> {
        let mut state = self.enter("close_change")?;
        Ok(if state.open_changes.remove(&number) {
            Removal::Removed
        } else {
            Removal::AlreadyAbsent
        })
    }

    async fn delete_ref(&self, _target: &ScenarioTarget, name: &str) -> Result<Removal> {
        let mut state = self.enter("delete_ref")?;
        Ok(if state.branches.remove(name) {
            Removal::Removed
        } else {
            Removal::AlreadyAbsent
        })
    }
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    secrets: BTreeSet<(String, String)>,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
}

/// Cluster double; deleting a namespace drops its secrets.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn namespaces(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().namespaces.clone()
    }

    pub fn secrets(&self) -> BTreeSet<(String, String)> {
        self.state.lock().unwrap().secrets.clone()
    }

    fn enter(
        &self,
        operation: &'static str,
        object: &str,
    ) -> Result<std::sync::MutexGuard<'_, ClusterState>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;
        if state.failing.contains(operation) {
            return Err(Error::Cluster {
                operation,
                object: object.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ClusterProvisioner for FakeCluster {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.enter("create_namespace", name)?;
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<Removal> {
        let mut state = self.enter("delete_namespace", name)?;
        state.secrets.retain(|(ns, _)| ns != name);
        Ok(if state.namespaces.remove(name) {
            Removal::Removed
        } else {
            Removal::AlreadyAbsent
        })
    }

    async fn create_secret(&self, namespace: &str, secret: &SecretSpec) -> Result<()> {
        let mut state = self.enter("create_secret", namespace)?;
        assert!(state.namespaces.contains(namespace));
        state
            .secrets
            .insert((namespace.to_string(), secret.name.clone()));
        Ok(())
    }
}

/// Observer returning a fixed observation on every poll.
pub struct FixedObserver(pub Observation);

#[async_trait]
impl Observer for FixedObserver {
    async fn poll(&self, _ctx: &ObservationContext) -> Result<Observation> {
        Ok(self.0.clone())
    }
}

/// Observer that panics on its first poll.
pub struct PanickingObserver;

#[async_trait]
impl Observer for PanickingObserver {
    async fn poll(&self, _ctx: &ObservationContext) -> Result<Observation> {
        panic!("observer exploded");
    }
}

pub fn target() -> ScenarioTarget {
    ScenarioTarget::new("acme", "widgets", false)
}
