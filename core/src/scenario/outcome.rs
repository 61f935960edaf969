//! Scenario verdicts and final status.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming::RunId;
use crate::provider::ProviderKind;
use crate::teardown::{TeardownReport, TriggerHandle};

/// Steps of the scenario state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Provision,
    Trigger,
    Observe,
    Conclude,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Provision => "provision",
            Stage::Trigger => "trigger",
            Stage::Observe => "observe",
            Stage::Conclude => "conclude",
        };
        f.write_str(name)
    }
}

/// The test verdict, independent of teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    Passed,
    /// The system under test reacted with a failure.
    Failed { reason: String },
    /// No conclusive reaction within the bound.
    TimedOut {
        #[serde(with = "duration_secs")]
        after: Duration,
    },
    /// The scenario stopped before observing.
    Aborted { stage: Stage, error: String },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::Failed { reason } => write!(f, "failed: {}", reason),
            Verdict::TimedOut { after } => write!(f, "timed out after {:?}", after),
            Verdict::Aborted { stage, error } => write!(f, "aborted during {}: {}", stage, error),
        }
    }
}

/// Final classification combining verdict and cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    /// Clean teardown, failed verdict.
    VerdictFailed,
    /// Passed verdict, resources left behind.
    TeardownDirty,
    VerdictFailedAndDirty,
    /// Resolve or authentication failed; nothing was created.
    NotStarted,
}

impl ScenarioStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ScenarioStatus::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "PASSED",
            ScenarioStatus::VerdictFailed => "FAILED (verdict)",
            ScenarioStatus::TeardownDirty => "FAILED (dirty teardown)",
            ScenarioStatus::VerdictFailedAndDirty => "FAILED (verdict, dirty teardown)",
            ScenarioStatus::NotStarted => "FAILED (not started)",
        }
    }
}

/// Everything known about a finished scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub run_id: RunId,
    pub provider: ProviderKind,
    pub namespace: String,
    pub handle: TriggerHandle,
    pub verdict: Verdict,
    /// `None` only when the scenario never got past Resolve.
    pub teardown: Option<TeardownReport>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl ScenarioOutcome {
    pub fn status(&self) -> ScenarioStatus {
        let report = match &self.teardown {
            Some(report) => report,
            None => return ScenarioStatus::NotStarted,
        };
        match (self.verdict.is_pass(), report.is_clean()) {
            (true, true) => ScenarioStatus::Passed,
            (false, true) => ScenarioStatus::VerdictFailed,
            (true, false) => ScenarioStatus::TeardownDirty,
            (false, false) => ScenarioStatus::VerdictFailedAndDirty,
        }
    }

    pub fn passed(&self) -> bool {
        self.status().is_success()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
