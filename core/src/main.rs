//! pac-e2e CLI
//!
//! Runs end-to-end scenario fixtures against real providers and a cluster,
//! then exits non-zero if any scenario failed or left resources behind.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;

use pac_e2e::cluster::{ClusterProvisioner, KubeProvisioner};
use pac_e2e::config::HarnessConfig;
use pac_e2e::env::ProcessEnv;
use pac_e2e::observe::{Observer, PipelineRunObserver};
use pac_e2e::scenario::{run_scenario, ScenarioOutcome, ScenarioSpec};
use pac_e2e::teardown::TeardownOutcome;
use pac_e2e::RunId;

#[derive(Debug, Parser)]
#[command(name = "pac-e2e", version, about = "Ephemeral-resource end-to-end harness")]
struct Args {
    /// Harness configuration file (TOML).
    #[arg(long, env = "PAC_E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Run identifier; generated when omitted.
    #[arg(long, env = "PAC_E2E_RUN_ID")]
    run_id: Option<String>,

    /// Print outcomes as JSON instead of a text summary.
    #[arg(long)]
    json: bool,

    /// Scenario fixtures (YAML).
    #[arg(required = true)]
    fixtures: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("pac-e2e: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> pac_e2e::Result<bool> {
    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let run_id = match &args.run_id {
        Some(raw) => RunId::new(raw)?,
        None => RunId::generate(),
    };

    let specs = args
        .fixtures
        .iter()
        .map(ScenarioSpec::load)
        .collect::<pac_e2e::Result<Vec<_>>>()?;

    let kube = KubeProvisioner::connect(config.managed_by.clone()).await?;
    let observer: Arc<dyn Observer> = Arc::new(PipelineRunObserver::new(kube.client().clone()));
    let cluster: Arc<dyn ClusterProvisioner> = Arc::new(kube);

    tracing::info!(run_id = %run_id, scenarios = specs.len(), "starting run");

    let mut scenario_ids = Vec::with_capacity(specs.len());
    for index in 0..specs.len() {
        scenario_ids.push(run_id.child(&index.to_string())?);
    }

    let env = ProcessEnv;
    let outcomes = join_all(specs.iter().zip(&scenario_ids).map(|(spec, id)| {
        run_scenario(
            spec,
            &env,
            cluster.clone(),
            observer.clone(),
            &config,
            id,
        )
    }))
    .await;

    if args.json {
        let rendered = serde_json::to_string_pretty(&outcomes)
            .map_err(|e| pac_e2e::Error::Config(format!("failed to render outcomes: {}", e)))?;
        println!("{}", rendered);
    } else {
        for outcome in &outcomes {
            print_outcome(outcome);
        }
    }

    Ok(outcomes.iter().all(ScenarioOutcome::passed))
}

fn print_outcome(outcome: &ScenarioOutcome) {
    println!("\n{}", "=".repeat(60));
    println!("Scenario: {} [{}]", outcome.name, outcome.status().label());
    println!("{}", "=".repeat(60));
    println!("Provider: {}", outcome.provider);
    println!("Run ID: {}", outcome.run_id);
    println!("Namespace: {}", outcome.namespace);
    if let Some(number) = outcome.handle.change {
        println!("Change: #{}", number);
    }
    if let Some(git_ref) = &outcome.handle.ref_name {
        println!("Ref: {}", git_ref);
    }
    println!("Verdict: {}", outcome.verdict);
    println!("Duration: {:?}", outcome.elapsed);

    match &outcome.teardown {
        Some(report) => {
            println!("Teardown:");
            for entry in &report.entries {
                let subject = entry.subject.as_deref().unwrap_or("-");
                let status = match &entry.outcome {
                    TeardownOutcome::Done => "done".to_string(),
                    TeardownOutcome::AlreadyAbsent => "already absent".to_string(),
                    TeardownOutcome::Skipped => "skipped".to_string(),
                    TeardownOutcome::Failed(error) => format!("FAILED: {}", error),
                };
                println!("  - {} ({}): {}", entry.action, subject, status);
            }
        }
        None => println!("Teardown: not needed, nothing was created"),
    }
}
