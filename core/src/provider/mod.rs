//! Git-hosting provider adapters.
//!
//! Every supported service is driven through the same [`ProviderAdapter`]
//! capability surface, so the scenario driver and teardown never branch on
//! provider kind. Authentication quirks (bearer tokens, basic auth, private
//! tokens) stay inside the individual adapters.

mod bitbucket;
mod github;
mod gitlab;
mod http;

pub use bitbucket::BitbucketCloudAdapter;
pub use github::GitHubAdapter;
pub use gitlab::GitLabAdapter;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::env::{ProviderConfig, ScenarioTarget};
use crate::error::Result;
use crate::teardown::Removal;

/// Supported git-hosting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[serde(rename = "github")]
    GitHub,
    BitbucketCloud,
    #[serde(rename = "gitlab")]
    GitLab,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::GitHub => "github",
            ProviderKind::BitbucketCloud => "bitbucket-cloud",
            ProviderKind::GitLab => "gitlab",
        };
        f.write_str(name)
    }
}

/// A secret string that never appears in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value for use in request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// An authenticated handle to one provider.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub kind: ProviderKind,
    pub api_url: String,
    pub credential: Credential,
    /// Identity of the acting user, as reported by the provider.
    pub user: String,
}

/// A file committed to the trigger branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFile {
    pub path: String,
    pub content: String,
}

/// Parameters for opening a pull/merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub title: String,
    pub body: String,
    /// Source branch.
    pub head: String,
    /// Target branch.
    pub base: String,
}

/// Uniform capability surface over a git-hosting provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Returns the session this adapter was authenticated with.
    fn session(&self) -> &ProviderSession;

    /// Creates branch `name` at the head of `from`.
    async fn create_branch(&self, target: &ScenarioTarget, name: &str, from: &str) -> Result<()>;

    /// Commits `files` onto `branch` as a single push.
    async fn push_files(
        &self,
        target: &ScenarioTarget,
        branch: &str,
        files: &[TriggerFile],
        message: &str,
    ) -> Result<()>;

    /// Opens a pull/merge request and returns its number.
    async fn open_change(&self, target: &ScenarioTarget, request: &ChangeRequest) -> Result<u64>;

    /// Closes (or declines) a pull/merge request.
    ///
    /// A change that is already closed, merged or unknown reports
    /// [`Removal::AlreadyAbsent`].
    async fn close_change(&self, target: &ScenarioTarget, number: u64) -> Result<Removal>;

    /// Deletes a branch.
    async fn delete_ref(&self, target: &ScenarioTarget, name: &str) -> Result<Removal>;
}

/// Builds and authenticates the adapter matching `config.kind`.
pub async fn authenticate(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        ProviderKind::GitHub => Arc::new(GitHubAdapter::connect(config).await?),
        ProviderKind::BitbucketCloud => Arc::new(BitbucketCloudAdapter::connect(config).await?),
        ProviderKind::GitLab => Arc::new(GitLabAdapter::connect(config).await?),
    };
    let session = adapter.session();
    tracing::info!(
        provider = %session.kind,
        user = %session.user,
        api_url = %session.api_url,
        "authenticated provider session"
    );
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&ProviderKind::GitHub).unwrap(), "\"github\"");
        assert_eq!(
            serde_json::to_string(&ProviderKind::BitbucketCloud).unwrap(),
            "\"bitbucket-cloud\""
        );
        assert_eq!(serde_json::to_string(&ProviderKind::GitLab).unwrap(), "\"gitlab\"");
        let kind: ProviderKind = serde_json::from_str("\"bitbucket-cloud\"").unwrap();
        assert_eq!(kind, ProviderKind::BitbucketCloud);
    }

    #[test]
    fn display_matches_serialized_name() {
        for kind in [
            ProviderKind::GitHub,
            ProviderKind::BitbucketCloud,
            ProviderKind::GitLab,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn credential_is_redacted() {
        let credential = Credential::new("ghp_supersecret");
        assert!(!format!("{:?}", credential).contains("supersecret"));
        assert!(!credential.to_string().contains("supersecret"));
        assert_eq!(credential.expose(), "ghp_supersecret");
    }
}
