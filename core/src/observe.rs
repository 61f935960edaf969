//! Bounded observation of the system under test.
//!
//! Observation is the only blocking wait in a scenario. It polls an
//! [`Observer`] with exponential backoff and gives up with
//! [`Error::Timeout`] once the bound is exceeded.

use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::{Deserialize, Serialize};

use crate::env::ScenarioTarget;
use crate::error::{Error, Result};
use crate::teardown::TriggerHandle;

/// State reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum Observation {
    /// No conclusive reaction yet.
    Pending,
    Succeeded,
    Failed(String),
}

impl Observation {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Observation::Pending)
    }
}

/// What an observer needs to find the reaction to a trigger.
#[derive(Debug, Clone)]
pub struct ObservationContext {
    pub namespace: String,
    pub target: ScenarioTarget,
    pub handle: TriggerHandle,
    /// Number of successful runs that counts as a pass.
    pub expected_runs: usize,
}

/// Checks whether the system under test has reacted.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn poll(&self, ctx: &ObservationContext) -> Result<Observation>;
}

/// Polling bounds for [`observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Overall bound on the observation.
    pub timeout: Duration,
    /// First delay between polls.
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls.
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Delay between polls: doubles after each pending result, capped at max.
#[derive(Debug, Clone)]
struct PollBackoff {
    current: Duration,
    max: Duration,
}

impl PollBackoff {
    fn new(policy: &PollPolicy) -> Self {
        Self {
            current: policy.initial_interval.min(policy.max_interval),
            max: policy.max_interval,
        }
    }

    /// Returns the delay to wait now and advances the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Polls `observer` until it reports a terminal state or `policy.timeout` elapses.
///
/// Poll errors are logged and retried; only the bound ends a pending wait.
pub async fn observe(
    observer: &dyn Observer,
    ctx: &ObservationContext,
    policy: &PollPolicy,
) -> Result<Observation> {
    let mut backoff = PollBackoff::new(policy);

    let wait = async {
        loop {
            match observer.poll(ctx).await {
                Ok(observation) if observation.is_terminal() => return observation,
                Ok(_) => {
                    tracing::debug!(namespace = %ctx.namespace, "no conclusive reaction yet")
                }
                Err(err) => {
                    tracing::warn!(
                        namespace = %ctx.namespace,
                        error = %err,
                        "observation poll failed"
                    )
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    };

    tokio::time::timeout(policy.timeout, wait)
        .await
        .map_err(|_| Error::Timeout(policy.timeout))
}

/// Watches Tekton PipelineRuns created in the scenario namespace.
#[derive(Clone)]
pub struct PipelineRunObserver {
    client: Client,
    resource: ApiResource,
}

impl PipelineRunObserver {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("tekton.dev", "v1", "PipelineRun");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }
}

#[async_trait]
impl Observer for PipelineRunObserver {
    async fn poll(&self, ctx: &ObservationContext) -> Result<Observation> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &ctx.namespace, &self.resource);
        let runs = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::Cluster {
                operation: "list_pipelineruns",
                object: ctx.namespace.clone(),
                reason: e.to_string(),
            })?;

        let statuses: Vec<(String, Option<String>)> = runs
            .items
            .iter()
            .map(|run| {
                (
                    run.metadata.name.clone().unwrap_or_default(),
                    succeeded_condition(&run.data),
                )
            })
            .collect();
        Ok(summarize(&statuses, ctx.expected_runs))
    }
}

/// Reads `status.conditions[type=Succeeded].status` from a PipelineRun body.
fn succeeded_condition(data: &serde_json::Value) -> Option<String> {
    data.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some("Succeeded"))?
        .get("status")?
        .as_str()
        .map(str::to_string)
}

/// Folds per-run condition statuses into one observation.
fn summarize(runs: &[(String, Option<String>)], expected: usize) -> Observation {
    if let Some((name, _)) = runs
        .iter()
        .find(|(_, status)| status.as_deref() == Some("False"))
    {
        return Observation::Failed(format!("PipelineRun {} failed", name));
    }

    let succeeded = runs
        .iter()
        .filter(|(_, status)| status.as_deref() == Some("True"))
        .count();
    if succeeded >= expected.max(1) {
        Observation::Succeeded
    } else {
        Observation::Pending
    }
}
