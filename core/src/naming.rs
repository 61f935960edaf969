//! Run-scoped identifiers for ephemeral resource names.
//!
//! A [`RunId`] is generated once per process and passed explicitly to every
//! scenario, so resource names are deterministic given the id and never
//! depend on hidden global randomness.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of ephemeral namespace names.
pub const NAMESPACE_PREFIX: &str = "e2e-test";

/// Prefix of trigger branch names.
pub const BRANCH_PREFIX: &str = "pac-e2e-test";

// Kubernetes namespace names are DNS-1123 labels.
const MAX_NAMESPACE_LEN: usize = 63;

/// Identifier for one run (or one scenario within a run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh id from a v4 UUID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string()[..8].to_string())
    }

    /// Builds an id from caller-supplied text.
    ///
    /// Characters outside `[a-z0-9-]` are replaced with dashes; the result must
    /// still produce a valid namespace name.
    pub fn new(raw: &str) -> Result<Self> {
        let sanitized = sanitize(raw);
        if sanitized.is_empty() {
            return Err(Error::Config(format!("run id '{}' is empty after sanitizing", raw)));
        }
        let id = Self(sanitized);
        if id.namespace_name().len() > MAX_NAMESPACE_LEN {
            return Err(Error::Config(format!(
                "run id '{}' produces a namespace name longer than {} characters",
                raw, MAX_NAMESPACE_LEN
            )));
        }
        Ok(id)
    }

    /// Derives a per-scenario id, e.g. `3f2a9c1e-github-pr`.
    pub fn child(&self, suffix: &str) -> Result<Self> {
        Self::new(&format!("{}-{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the namespace owned by this run.
    pub fn namespace_name(&self) -> String {
        format!("{}-{}", NAMESPACE_PREFIX, self.0)
    }

    /// Name of the trigger branch owned by this run.
    pub fn branch_name(&self) -> String {
        format!("{}-{}", BRANCH_PREFIX, self.0)
    }
}

fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}
