//! Bitbucket Cloud REST adapter.
//!
//! Bitbucket authenticates with a user/app-password pair and has no "close"
//! for pull requests; closing one means declining it.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::env::{ProviderConfig, ScenarioTarget};
use crate::error::{Error, Result};
use crate::teardown::Removal;

use super::http::{Auth, RestClient};
use super::{ChangeRequest, ProviderAdapter, ProviderKind, ProviderSession, TriggerFile};

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Branch {
    target: Commit,
}

#[derive(Debug, Deserialize)]
struct Commit {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    id: u64,
    state: String,
}

/// Adapter for the Bitbucket Cloud 2.0 API.
pub struct BitbucketCloudAdapter {
    client: RestClient,
    session: ProviderSession,
}

impl BitbucketCloudAdapter {
    /// Builds the client from the user/token/workspace triple and confirms it.
    pub async fn connect(config: &ProviderConfig) -> Result<Self> {
        let user = config.user.clone().ok_or_else(|| {
            Error::Config("Bitbucket Cloud requires a user for basic authentication".to_string())
        })?;
        let client = RestClient::new(
            ProviderKind::BitbucketCloud,
            &config.api_url,
            Auth::Basic {
                user: user.clone(),
                token: config.token.clone(),
            },
        )?;
        let me: User = client.current_user("/user").await?;
        let identity = me
            .username
            .or(me.nickname)
            .or(me.account_id)
            .unwrap_or(user);
        let session = ProviderSession {
            kind: ProviderKind::BitbucketCloud,
            api_url: client.base_url().to_string(),
            credential: config.token.clone(),
            user: identity,
        };
        Ok(Self { client, session })
    }

    fn repo_path(target: &ScenarioTarget) -> String {
        format!(
            "/repositories/{}/{}",
            target.organization, target.repository
        )
    }
}

#[async_trait]
impl ProviderAdapter for BitbucketCloudAdapter {
    fn session(&self) -> &ProviderSession {
        &self.session
    }

    async fn create_branch(&self, target: &ScenarioTarget, name: &str, from: &str) -> Result<()> {
        let repo = Self::repo_path(target);
        let base: Branch = self
            .client
            .execute_json(
                "create_branch",
                self.client
                    .request(Method::GET, &format!("{}/refs/branches/{}", repo, from)),
            )
            .await?;

        self.client
            .execute(
                "create_branch",
                self.client
                    .request(Method::POST, &format!("{}/refs/branches", repo))
                    .json(&json!({
                        "name": name,
                        "target": { "hash": base.target.hash },
                    })),
            )
            .await?;
        tracing::debug!(branch = %name, from = %from, "created Bitbucket branch");
        Ok(())
    }

    async fn push_files(
        &self,
        target: &ScenarioTarget,
        branch: &str,
        files: &[TriggerFile],
        message: &str,
    ) -> Result<()> {
        // The src endpoint takes every file as a form field named after its path.
        let mut form: Vec<(&str, &str)> = vec![("message", message), ("branch", branch)];
        for file in files {
            form.push((file.path.as_str(), file.content.as_str()));
        }

        self.client
            .execute(
                "push_files",
                self.client
                    .request(Method::POST, &format!("{}/src", Self::repo_path(target)))
                    .form(&form),
            )
            .await?;
        Ok(())
    }

    async fn open_change(&self, target: &ScenarioTarget, request: &ChangeRequest) -> Result<u64> {
        let pr: PullRequest = self
            .client
            .execute_json(
                "open_change",
                self.client
                    .request(
                        Method::POST,
                        &format!("{}/pullrequests", Self::repo_path(target)),
                    )
                    .json(&json!({
                        "title": request.title,
                        "description": request.body,
                        "source": { "branch": { "name": request.head } },
                        "destination": { "branch": { "name": request.base } },
                    })),
            )
            .await?;
        Ok(pr.id)
    }

    async fn close_change(&self, target: &ScenarioTarget, number: u64) -> Result<Removal> {
        let path = format!("{}/pullrequests/{}", Self::repo_path(target), number);
        let current = self
            .client
            .execute_json::<PullRequest>("close_change", self.client.request(Method::GET, &path))
            .await;
        match current {
            Ok(pr) if pr.state != "OPEN" => return Ok(Removal::AlreadyAbsent),
            Ok(_) => {}
            Err(err) if err.status() == Some(404) => return Ok(Removal::AlreadyAbsent),
            Err(err) => return Err(err),
        }

        self.client
            .execute(
                "close_change",
                self.client
                    .request(Method::POST, &format!("{}/decline", path)),
            )
            .await?;
        Ok(Removal::Removed)
    }

    async fn delete_ref(&self, target: &ScenarioTarget, name: &str) -> Result<Removal> {
        self.client
            .execute_removal(
                "delete_ref",
                self.client.request(
                    Method::DELETE,
                    &format!("{}/refs/branches/{}", Self::repo_path(target), name),
                ),
                &[StatusCode::NOT_FOUND],
            )
            .await
    }
}
