//! Environment resolution for provider credentials and scenario targets.
//!
//! Each provider (and, for GitHub, each delivery mode) needs a fixed set of
//! `TEST_*` variables. Resolution collects every missing variable before
//! failing so a misconfigured CI job reports all of them at once.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{Credential, ProviderKind};

pub const EL_URL: &str = "TEST_EL_URL";
pub const EL_WEBHOOK_SECRET: &str = "TEST_EL_WEBHOOK_SECRET";
pub const GITHUB_API_URL: &str = "TEST_GITHUB_API_URL";
pub const GITHUB_TOKEN: &str = "TEST_GITHUB_TOKEN";
pub const GITHUB_REPO_OWNER_GITHUBAPP: &str = "TEST_GITHUB_REPO_OWNER_GITHUBAPP";
pub const GITHUB_REPO_OWNER_WEBHOOK: &str = "TEST_GITHUB_REPO_OWNER_WEBHOOK";
pub const BITBUCKET_CLOUD_USER: &str = "TEST_BITBUCKET_CLOUD_USER";
pub const BITBUCKET_CLOUD_TOKEN: &str = "TEST_BITBUCKET_CLOUD_TOKEN";
pub const BITBUCKET_CLOUD_E2E_REPOSITORY: &str = "TEST_BITBUCKET_CLOUD_E2E_REPOSITORY";
pub const BITBUCKET_CLOUD_API_URL: &str = "TEST_BITBUCKET_CLOUD_API_URL";
pub const GITLAB_API_URL: &str = "TEST_GITLAB_API_URL";
pub const GITLAB_TOKEN: &str = "TEST_GITLAB_TOKEN";
pub const GITLAB_PROJECT: &str = "TEST_GITLAB_PROJECT";

/// Source of environment values.
pub trait EnvSource {
    /// Returns the value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Values resolved for a set of required keys.
#[derive(Debug, Clone, Default)]
pub struct ResolvedEnv {
    values: BTreeMap<&'static str, String>,
}

impl ResolvedEnv {
    /// Returns a resolved value.
    ///
    /// Only keys passed to [`resolve`] are present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingEnv(vec![key.to_string()]))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolves every key in `keys`, failing with all missing names at once.
///
/// Empty values are treated as missing.
pub fn resolve(keys: &[&'static str], source: &dyn EnvSource) -> Result<ResolvedEnv> {
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();

    for &key in keys {
        match source.get(key) {
            Some(value) if !value.trim().is_empty() => {
                values.insert(key, value);
            }
            _ => missing.push(key.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingEnv(missing));
    }
    Ok(ResolvedEnv { values })
}

/// Returns the keys a provider needs for the given delivery mode.
pub fn required_keys(kind: ProviderKind, direct_webhook: bool) -> Vec<&'static str> {
    match kind {
        ProviderKind::GitHub => {
            let owner = if direct_webhook {
                GITHUB_REPO_OWNER_WEBHOOK
            } else {
                GITHUB_REPO_OWNER_GITHUBAPP
            };
            vec![EL_URL, GITHUB_API_URL, GITHUB_TOKEN, owner, EL_WEBHOOK_SECRET]
        }
        ProviderKind::BitbucketCloud => vec![
            BITBUCKET_CLOUD_USER,
            BITBUCKET_CLOUD_TOKEN,
            BITBUCKET_CLOUD_E2E_REPOSITORY,
            BITBUCKET_CLOUD_API_URL,
        ],
        ProviderKind::GitLab => vec![GITLAB_API_URL, GITLAB_TOKEN, GITLAB_PROJECT],
    }
}

/// Splits an `org/repo` identifier.
///
/// Exactly one separator with non-empty halves is accepted.
pub fn split_org_repo(value: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = value.split('/').collect();
    match parts.as_slice() {
        [org, repo] if !org.is_empty() && !repo.is_empty() => {
            Ok((org.to_string(), repo.to_string()))
        }
        _ => Err(Error::Config(format!(
            "expected '<organization>/<repository>', got '{}'",
            value
        ))),
    }
}

/// Organization and repository a scenario runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTarget {
    /// Organization, workspace or group.
    pub organization: String,
    /// Repository name.
    pub repository: String,
    /// Whether events reach the system under test through a repository
    /// webhook rather than a registered app.
    pub direct_webhook: bool,
}

impl ScenarioTarget {
    pub fn new(
        organization: impl Into<String>,
        repository: impl Into<String>,
        direct_webhook: bool,
    ) -> Self {
        Self {
            organization: organization.into(),
            repository: repository.into(),
            direct_webhook,
        }
    }

    /// Returns `org/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }
}

/// Provider configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_url: String,
    pub token: Credential,
    /// Account name for providers using basic auth.
    pub user: Option<String>,
    /// Combined `org/repo` identifier.
    pub repository: String,
    /// Controller (event listener) URL the system under test listens on.
    pub controller_url: Option<String>,
    pub webhook_secret: Option<Credential>,
    pub direct_webhook: bool,
}

impl ProviderConfig {
    /// Key/value data injected into the scenario namespace for the system
    /// under test.
    pub fn secret_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("provider.token".to_string(), self.token.expose().to_string());
        if let Some(user) = &self.user {
            data.insert("provider.user".to_string(), user.clone());
        }
        if let Some(secret) = &self.webhook_secret {
            data.insert("webhook.secret".to_string(), secret.expose().to_string());
        }
        data
    }
}

/// Resolves configuration and target for one provider and mode.
///
/// Nothing is contacted; a malformed repository identifier fails here,
/// before any client exists.
pub fn resolve_provider(
    kind: ProviderKind,
    direct_webhook: bool,
    source: &dyn EnvSource,
) -> Result<(ProviderConfig, ScenarioTarget)> {
    let resolved = resolve(&required_keys(kind, direct_webhook), source)?;

    let config = match kind {
        ProviderKind::GitHub => {
            let owner_key = if direct_webhook {
                GITHUB_REPO_OWNER_WEBHOOK
            } else {
                GITHUB_REPO_OWNER_GITHUBAPP
            };
            ProviderConfig {
                kind,
                api_url: resolved.require(GITHUB_API_URL)?,
                token: Credential::new(resolved.require(GITHUB_TOKEN)?),
                user: None,
                repository: resolved.require(owner_key)?,
                controller_url: Some(resolved.require(EL_URL)?),
                webhook_secret: Some(Credential::new(resolved.require(EL_WEBHOOK_SECRET)?)),
                direct_webhook,
            }
        }
        ProviderKind::BitbucketCloud => ProviderConfig {
            kind,
            api_url: resolved.require(BITBUCKET_CLOUD_API_URL)?,
            token: Credential::new(resolved.require(BITBUCKET_CLOUD_TOKEN)?),
            user: Some(resolved.require(BITBUCKET_CLOUD_USER)?),
            repository: resolved.require(BITBUCKET_CLOUD_E2E_REPOSITORY)?,
            controller_url: None,
            webhook_secret: None,
            direct_webhook,
        },
        ProviderKind::GitLab => ProviderConfig {
            kind,
            api_url: resolved.require(GITLAB_API_URL)?,
            token: Credential::new(resolved.require(GITLAB_TOKEN)?),
            user: None,
            repository: resolved.require(GITLAB_PROJECT)?,
            controller_url: None,
            webhook_secret: None,
            direct_webhook,
        },
    };

    let (organization, repository) = split_org_repo(&config.repository)?;
    let target = ScenarioTarget::new(organization, repository, direct_webhook);
    Ok((config, target))
}
