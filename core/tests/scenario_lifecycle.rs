//! Scenario lifecycle tests against in-memory provider and cluster doubles.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{target, FakeCluster, FakeProvider, FixedObserver, PanickingObserver};
use pac_e2e::cluster::{ClusterProvisioner, EphemeralNamespace, SecretSpec};
use pac_e2e::config::HarnessConfig;
use pac_e2e::observe::{Observation, Observer};
use pac_e2e::provider::ProviderAdapter;
use pac_e2e::scenario::{
    run_scenario, ScenarioDriver, ScenarioPlan, ScenarioSpec, ScenarioStatus, Stage, Verdict,
};
use pac_e2e::teardown::{
    TeardownAction, TeardownCoordinator, TeardownGuard, TeardownOutcome, TriggerHandle,
};
use pac_e2e::RunId;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn spec(yaml: &str) -> ScenarioSpec {
    serde_yaml::from_str(yaml).unwrap()
}

fn pull_request_spec() -> ScenarioSpec {
    spec(
        r#"
name: github-pr
provider: github
files:
  .tekton/pr.yaml: "namespace: {{ namespace }}"
secrets:
  - name: extra
    data:
      key: value
"#,
    )
}

fn push_spec() -> ScenarioSpec {
    spec(
        r#"
name: github-push
provider: github
event: push
files:
  .tekton/push.yaml: "on-event: {{ event }}"
"#,
    )
}

struct Harness {
    provider: Arc<FakeProvider>,
    cluster: Arc<FakeCluster>,
}

impl Harness {
    fn new() -> Self {
        Self {
            provider: Arc::new(FakeProvider::new(42)),
            cluster: Arc::new(FakeCluster::new()),
        }
    }

    fn driver(&self, observer: impl Observer + 'static) -> ScenarioDriver {
        let adapter: Arc<dyn ProviderAdapter> = self.provider.clone();
        let cluster: Arc<dyn ClusterProvisioner> = self.cluster.clone();
        ScenarioDriver::new(adapter, cluster, Arc::new(observer), HarnessConfig::default())
    }

    fn coordinator(&self) -> TeardownCoordinator {
        TeardownCoordinator::new(self.provider.clone(), self.cluster.clone())
    }
}

fn plan(spec: &ScenarioSpec, run_id: &RunId) -> ScenarioPlan {
    let mut plan = ScenarioPlan::render(spec, run_id, &HarnessConfig::default(), None);
    plan.observe_timeout = Some(Duration::from_millis(100));
    plan
}

#[tokio::test]
async fn timed_out_scenario_still_reverses_everything() {
    let harness = Harness::new();
    let run_id = RunId::new("a1b2c3").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Pending));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert_eq!(
        outcome.verdict,
        Verdict::TimedOut {
            after: Duration::from_millis(100)
        }
    );
    assert_eq!(outcome.handle.change, Some(42));
    assert_eq!(outcome.handle.ref_name.as_deref(), Some("pac-e2e-test-a1b2c3"));
    assert_eq!(outcome.namespace, "e2e-test-a1b2c3");

    let report = outcome.teardown.as_ref().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.outcome(TeardownAction::CloseChange), Some(&TeardownOutcome::Done));
    assert_eq!(
        report.outcome(TeardownAction::DeleteNamespace),
        Some(&TeardownOutcome::Done)
    );
    assert_eq!(report.outcome(TeardownAction::DeleteRef), Some(&TeardownOutcome::Done));
    assert_eq!(outcome.status(), ScenarioStatus::VerdictFailed);

    assert!(harness.provider.open_changes().is_empty());
    assert!(harness.provider.branches().is_empty());
    assert!(harness.cluster.namespaces().is_empty());
    assert!(harness.cluster.secrets().is_empty());
}

#[tokio::test]
async fn passing_scenario_pushes_rendered_files() {
    let harness = Harness::new();
    let run_id = RunId::new("ok1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert!(outcome.passed());
    let pushed = harness.provider.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].content, "namespace: e2e-test-ok1");
    assert_eq!(harness.cluster.calls("create_secret"), 1);
}

#[tokio::test]
async fn failed_reaction_is_a_failed_verdict() {
    let harness = Harness::new();
    let run_id = RunId::new("bad1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Failed(
        "PipelineRun pr-x failed".into(),
    )));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert_eq!(
        outcome.verdict,
        Verdict::Failed {
            reason: "PipelineRun pr-x failed".into()
        }
    );
    assert!(outcome.teardown.as_ref().unwrap().is_clean());
}

#[tokio::test]
async fn partial_provision_deletes_created_namespace() {
    let harness = Harness::new();
    harness.cluster.fail_on("create_secret");
    let run_id = RunId::new("part1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert!(matches!(
        outcome.verdict,
        Verdict::Aborted {
            stage: Stage::Provision,
            ..
        }
    ));
    assert_eq!(harness.cluster.calls("delete_namespace"), 1);
    assert!(harness.cluster.namespaces().is_empty());
    assert_eq!(harness.provider.calls("create_branch"), 0);

    let report = outcome.teardown.as_ref().unwrap();
    assert_eq!(report.outcome(TeardownAction::CloseChange), Some(&TeardownOutcome::Skipped));
    assert_eq!(report.outcome(TeardownAction::DeleteRef), Some(&TeardownOutcome::Skipped));
    assert_eq!(outcome.status(), ScenarioStatus::VerdictFailed);
}

#[tokio::test]
async fn namespace_creation_failure_leaves_nothing_to_reverse() {
    let harness = Harness::new();
    harness.cluster.fail_on("create_namespace");
    let run_id = RunId::new("ns1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert!(matches!(outcome.verdict, Verdict::Aborted { stage: Stage::Provision, .. }));
    assert_eq!(harness.cluster.calls("delete_namespace"), 0);
    let report = outcome.teardown.as_ref().unwrap();
    assert!(report.is_clean());
    assert!(report
        .entries
        .iter()
        .all(|e| e.outcome == TeardownOutcome::Skipped));
}

#[tokio::test]
async fn push_trigger_never_closes_a_change() {
    let harness = Harness::new();
    let run_id = RunId::new("push1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&push_spec(), &run_id), &target(), &run_id)
        .await;

    assert!(outcome.passed());
    assert_eq!(outcome.handle.change, None);
    assert_eq!(harness.provider.calls("open_change"), 0);
    assert_eq!(harness.provider.calls("close_change"), 0);
    assert_eq!(harness.provider.calls("delete_ref"), 1);
    assert!(harness.provider.branches().is_empty());
}

#[tokio::test]
async fn failed_change_creation_still_deletes_ref() {
    let harness = Harness::new();
    harness.provider.fail_on("open_change");
    let run_id = RunId::new("oc1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert!(matches!(outcome.verdict, Verdict::Aborted { stage: Stage::Trigger, .. }));
    assert_eq!(outcome.handle.change, None);
    assert_eq!(harness.provider.calls("close_change"), 0);
    assert_eq!(harness.provider.calls("delete_ref"), 1);
    assert!(harness.provider.branches().is_empty());
    assert!(harness.cluster.namespaces().is_empty());
}

#[tokio::test]
async fn teardown_failures_are_collected_not_short_circuited() {
    let harness = Harness::new();
    harness.provider.fail_on("close_change");
    let run_id = RunId::new("dirty1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.status(), ScenarioStatus::TeardownDirty);
    assert!(!outcome.passed());

    let report = outcome.teardown.as_ref().unwrap();
    assert_eq!(report.failures().count(), 1);
    assert!(matches!(
        report.outcome(TeardownAction::CloseChange),
        Some(TeardownOutcome::Failed(_))
    ));
    assert_eq!(
        report.outcome(TeardownAction::DeleteNamespace),
        Some(&TeardownOutcome::Done)
    );
    assert_eq!(report.outcome(TeardownAction::DeleteRef), Some(&TeardownOutcome::Done));
}

#[tokio::test]
async fn panicking_observer_is_aborted_and_cleaned_up() {
    let harness = Harness::new();
    let run_id = RunId::new("panic1").unwrap();
    let driver = harness.driver(PanickingObserver);

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;

    match &outcome.verdict {
        Verdict::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::Observe);
            assert!(error.contains("observer exploded"));
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert!(outcome.teardown.as_ref().unwrap().is_clean());
    assert!(harness.cluster.namespaces().is_empty());
    assert!(harness.provider.open_changes().is_empty());
}

#[tokio::test]
async fn repeated_teardown_reports_already_absent() {
    let harness = Harness::new();
    let run_id = RunId::new("idem1").unwrap();
    let driver = harness.driver(FixedObserver(Observation::Succeeded));

    let outcome = driver
        .run(&plan(&pull_request_spec(), &run_id), &target(), &run_id)
        .await;
    assert!(outcome.passed());

    let namespace = EphemeralNamespace::new(outcome.namespace.clone());
    let again = harness
        .coordinator()
        .teardown(&target(), &outcome.handle, Some(&namespace))
        .await;

    assert!(again.is_clean());
    assert_eq!(again.entries.len(), 3);
    assert!(again
        .entries
        .iter()
        .all(|e| e.outcome == TeardownOutcome::AlreadyAbsent));
}

#[tokio::test]
async fn dropped_guard_schedules_teardown() {
    let harness = Harness::new();
    harness.cluster.create_namespace("e2e-test-drop1").await.unwrap();
    harness
        .provider
        .create_branch(&target(), "pac-e2e-test-drop1", "main")
        .await
        .unwrap();

    {
        let mut guard = TeardownGuard::new(harness.coordinator(), target());
        guard.record_namespace(EphemeralNamespace::new("e2e-test-drop1"));
        guard.record_ref("pac-e2e-test-drop1");
    }

    for _ in 0..50 {
        if harness.cluster.namespaces().is_empty() && harness.provider.branches().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.cluster.namespaces().is_empty());
    assert!(harness.provider.branches().is_empty());
    assert_eq!(harness.provider.calls("close_change"), 0);
}

#[tokio::test]
async fn released_empty_guard_skips_every_action() {
    let harness = Harness::new();
    let guard = TeardownGuard::new(harness.coordinator(), target());
    assert_eq!(guard.handle(), &TriggerHandle::default());

    let report = guard.release().await;
    assert!(report.is_clean());
    assert!(report
        .entries
        .iter()
        .all(|e| e.outcome == TeardownOutcome::Skipped));
    assert_eq!(harness.cluster.total_calls(), 0);
}

#[tokio::test]
async fn guard_tracks_secrets_inside_namespace() {
    let harness = Harness::new();
    let mut guard = TeardownGuard::new(harness.coordinator(), target());
    guard.record_secret("ignored-without-namespace");
    guard.record_namespace(EphemeralNamespace::new("e2e-test-sec"));
    guard.record_secret("pac-e2e-provider");

    let ns = guard.namespace().unwrap();
    assert_eq!(ns.secrets, vec!["pac-e2e-provider".to_string()]);
    let _ = guard.release().await;
}

#[tokio::test]
async fn missing_environment_stops_before_any_resource() {
    let cluster = Arc::new(FakeCluster::new());
    let env: HashMap<String, String> = HashMap::new();
    let run_id = RunId::new("env1").unwrap();

    let outcome = run_scenario(
        &pull_request_spec(),
        &env,
        cluster.clone(),
        Arc::new(FixedObserver(Observation::Succeeded)),
        &HarnessConfig::default(),
        &run_id,
    )
    .await;

    assert_eq!(outcome.status(), ScenarioStatus::NotStarted);
    assert!(outcome.teardown.is_none());
    match &outcome.verdict {
        Verdict::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::Resolve);
            assert!(error.contains("TEST_GITHUB_TOKEN"));
            assert!(error.contains("TEST_EL_URL"));
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(cluster.total_calls(), 0);
}

#[tokio::test]
async fn malformed_repository_fails_before_any_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "e2e-bot"})))
        .expect(0)
        .mount(&server)
        .await;

    let cluster = Arc::new(FakeCluster::new());
    let api_url = server.uri();
    let env: HashMap<String, String> = [
        ("TEST_EL_URL", "https://el.example.test"),
        ("TEST_EL_WEBHOOK_SECRET", "shh"),
        ("TEST_GITHUB_API_URL", api_url.as_str()),
        ("TEST_GITHUB_TOKEN", "ghp_x"),
        ("TEST_GITHUB_REPO_OWNER_GITHUBAPP", "no-slash-here"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let outcome = run_scenario(
        &pull_request_spec(),
        &env,
        cluster.clone(),
        Arc::new(FixedObserver(Observation::Succeeded)),
        &HarnessConfig::default(),
        &RunId::new("env2").unwrap(),
    )
    .await;

    assert_eq!(outcome.status(), ScenarioStatus::NotStarted);
    match &outcome.verdict {
        Verdict::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::Resolve);
            assert!(error.contains("expected '<organization>/<repository>'"), "{error}");
            assert!(error.contains("no-slash-here"));
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(cluster.total_calls(), 0);
}

#[tokio::test]
async fn every_planned_secret_is_created() {
    let harness = Harness::new();
    let run_id = RunId::new("sec1").unwrap();
    let mut plan = plan(&pull_request_spec(), &run_id);
    plan.secrets.insert(
        0,
        SecretSpec::new(
            "pac-e2e-provider",
            [("provider.token".to_string(), "t".to_string())].into(),
        ),
    );

    let outcome = harness
        .driver(FixedObserver(Observation::Succeeded))
        .run(&plan, &target(), &run_id)
        .await;

    assert!(outcome.passed());
    assert_eq!(harness.cluster.calls("create_secret"), 2);
}
