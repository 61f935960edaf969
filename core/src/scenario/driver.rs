//! Scenario state machine: resolve, provision, trigger, observe, conclude.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;

use crate::cluster::{ClusterProvisioner, EphemeralNamespace};
use crate::config::HarnessConfig;
use crate::env::{self, EnvSource, ScenarioTarget};
use crate::error::{Error, Result};
use crate::naming::RunId;
use crate::observe::{self, Observation, ObservationContext, Observer};
use crate::provider::{self, ProviderAdapter};
use crate::teardown::{TeardownCoordinator, TeardownGuard, TriggerHandle};

use super::fixture::{ScenarioPlan, ScenarioSpec};
use super::outcome::{ScenarioOutcome, Stage, Verdict};

/// Drives one scenario against an authenticated provider and a cluster.
pub struct ScenarioDriver {
    adapter: Arc<dyn ProviderAdapter>,
    cluster: Arc<dyn ClusterProvisioner>,
    observer: Arc<dyn Observer>,
    config: HarnessConfig,
}

impl ScenarioDriver {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        cluster: Arc<dyn ClusterProvisioner>,
        observer: Arc<dyn Observer>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            adapter,
            cluster,
            observer,
            config,
        }
    }

    /// Runs provision, trigger and observe, then always tears down.
    ///
    /// The verdict comes from the observe step (or the step that aborted);
    /// the teardown report is attached regardless.
    pub async fn run(
        &self,
        plan: &ScenarioPlan,
        target: &ScenarioTarget,
        run_id: &RunId,
    ) -> ScenarioOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(
            scenario = %plan.name,
            run_id = %run_id,
            provider = %self.adapter.session().kind,
            repo = %target.full_name(),
            "starting scenario"
        );

        let coordinator = TeardownCoordinator::new(self.adapter.clone(), self.cluster.clone());
        let mut guard = TeardownGuard::new(coordinator, target.clone());
        let mut stage = Stage::Provision;

        let exercised = AssertUnwindSafe(self.exercise(plan, target, &mut guard, &mut stage))
            .catch_unwind()
            .await;
        let verdict = match exercised {
            Ok(verdict) => verdict,
            Err(panic) => Verdict::Aborted {
                stage,
                error: format!("panicked: {}", panic_message(panic.as_ref())),
            },
        };

        tracing::info!(scenario = %plan.name, verdict = %verdict, "concluding scenario");
        let handle = guard.handle().clone();
        let report = guard.release().await;

        let outcome = ScenarioOutcome {
            name: plan.name.clone(),
            run_id: run_id.clone(),
            provider: self.adapter.session().kind,
            namespace: plan.namespace.clone(),
            handle,
            verdict,
            teardown: Some(report),
            started_at,
            elapsed: clock.elapsed(),
        };
        tracing::info!(
            scenario = %outcome.name,
            status = outcome.status().label(),
            elapsed = ?outcome.elapsed,
            "scenario finished"
        );
        outcome
    }

    async fn exercise(
        &self,
        plan: &ScenarioPlan,
        target: &ScenarioTarget,
        guard: &mut TeardownGuard,
        stage: &mut Stage,
    ) -> Verdict {
        *stage = Stage::Provision;
        if let Err(err) = self.provision(plan, guard).await {
            return aborted(*stage, err);
        }

        *stage = Stage::Trigger;
        if let Err(err) = self.trigger(plan, target, guard).await {
            return aborted(*stage, err);
        }

        *stage = Stage::Observe;
        let ctx = ObservationContext {
            namespace: plan.namespace.clone(),
            target: target.clone(),
            handle: guard.handle().clone(),
            expected_runs: plan.expected_runs,
        };
        let policy = self.config.poll_policy(plan.observe_timeout);
        let observed = observe::observe(self.observer.as_ref(), &ctx, &policy).await;
        *stage = Stage::Conclude;

        match observed {
            Ok(Observation::Succeeded) => Verdict::Passed,
            Ok(Observation::Failed(reason)) => Verdict::Failed { reason },
            Ok(Observation::Pending) => Verdict::Failed {
                reason: "observation ended without a conclusive state".to_string(),
            },
            Err(Error::Timeout(after)) => {
                tracing::warn!(
                    namespace = %plan.namespace,
                    after = ?after,
                    "observation timed out"
                );
                Verdict::TimedOut { after }
            }
            Err(err) => aborted(Stage::Observe, err),
        }
    }

    async fn provision(&self, plan: &ScenarioPlan, guard: &mut TeardownGuard) -> Result<()> {
        self.cluster.create_namespace(&plan.namespace).await?;
        guard.record_namespace(EphemeralNamespace::new(plan.namespace.clone()));

        for secret in &plan.secrets {
            self.cluster.create_secret(&plan.namespace, secret).await?;
            guard.record_secret(&secret.name);
        }
        Ok(())
    }

    async fn trigger(
        &self,
        plan: &ScenarioPlan,
        target: &ScenarioTarget,
        guard: &mut TeardownGuard,
    ) -> Result<()> {
        self.adapter
            .create_branch(target, &plan.branch, &plan.base_branch)
            .await?;
        guard.record_ref(plan.branch.clone());

        self.adapter
            .push_files(target, &plan.branch, &plan.files, &plan.commit_message())
            .await?;

        if let Some(request) = plan.change_request() {
            let number = self.adapter.open_change(target, &request).await?;
            tracing::info!(change = number, branch = %plan.branch, "opened change");
            guard.record_change(number);
        }
        Ok(())
    }
}

fn aborted(stage: Stage, err: Error) -> Verdict {
    tracing::error!(stage = %stage, error = %err, "scenario step failed");
    Verdict::Aborted {
        stage,
        error: err.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolves configuration, authenticates, and runs one scenario.
///
/// Resolve and authentication failures produce an outcome with no teardown
/// report: nothing was created, so there is nothing to reverse.
pub async fn run_scenario(
    spec: &ScenarioSpec,
    source: &dyn EnvSource,
    cluster: Arc<dyn ClusterProvisioner>,
    observer: Arc<dyn Observer>,
    config: &HarnessConfig,
    run_id: &RunId,
) -> ScenarioOutcome {
    let started_at = Utc::now();
    let clock = Instant::now();

    let setup = async {
        let (provider_config, target) =
            env::resolve_provider(spec.provider, spec.direct_webhook, source)?;
        let adapter = provider::authenticate(&provider_config).await?;
        Ok::<_, Error>((provider_config, target, adapter))
    };

    match setup.await {
        Ok((provider_config, target, adapter)) => {
            let plan = ScenarioPlan::render(spec, run_id, config, Some(&provider_config));
            ScenarioDriver::new(adapter, cluster, observer, config.clone())
                .run(&plan, &target, run_id)
                .await
        }
        Err(err) => {
            tracing::error!(scenario = %spec.name, error = %err, "scenario setup failed");
            ScenarioOutcome {
                name: spec.name.clone(),
                run_id: run_id.clone(),
                provider: spec.provider,
                namespace: run_id.namespace_name(),
                handle: TriggerHandle::default(),
                verdict: Verdict::Aborted {
                    stage: Stage::Resolve,
                    error: err.to_string(),
                },
                teardown: None,
                started_at,
                elapsed: clock.elapsed(),
            }
        }
    }
}
