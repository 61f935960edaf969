//! End-to-end scenarios.
//!
//! A scenario is one create, trigger, observe, destroy cycle against a
//! provider and the cluster. Fixtures are YAML files describing the trigger;
//! the driver owns the lifecycle and always concludes with teardown.

pub mod driver;
pub mod fixture;
pub mod outcome;

pub use driver::{run_scenario, ScenarioDriver};
pub use fixture::{ScenarioPlan, ScenarioSpec, TriggerEvent};
pub use outcome::{ScenarioOutcome, ScenarioStatus, Stage, Verdict};
