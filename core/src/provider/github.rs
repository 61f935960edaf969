//! GitHub (and GitHub Enterprise) REST adapter.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::env::{ProviderConfig, ScenarioTarget};
use crate::error::Result;
use crate::teardown::Removal;

use super::http::{Auth, RestClient};
use super::{ChangeRequest, ProviderAdapter, ProviderKind, ProviderSession, TriggerFile};

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Pull {
    number: u64,
    state: String,
}

/// Adapter for the GitHub REST API, authenticated with a bearer token.
pub struct GitHubAdapter {
    client: RestClient,
    session: ProviderSession,
}

impl GitHubAdapter {
    /// Builds the client and confirms the token by fetching the acting user.
    pub async fn connect(config: &ProviderConfig) -> Result<Self> {
        let client = RestClient::new(
            ProviderKind::GitHub,
            &config.api_url,
            Auth::Bearer(config.token.clone()),
        )?;
        let user: User = client.current_user("/user").await?;
        let session = ProviderSession {
            kind: ProviderKind::GitHub,
            api_url: client.base_url().to_string(),
            credential: config.token.clone(),
            user: user.login,
        };
        Ok(Self { client, session })
    }

    fn repo_path(target: &ScenarioTarget) -> String {
        format!("/repos/{}/{}", target.organization, target.repository)
    }
}

#[async_trait]
impl ProviderAdapter for GitHubAdapter {
    fn session(&self) -> &ProviderSession {
        &self.session
    }

    async fn create_branch(&self, target: &ScenarioTarget, name: &str, from: &str) -> Result<()> {
        let repo = Self::repo_path(target);
        let base: GitRef = self
            .client
            .execute_json(
                "create_branch",
                self.client
                    .request(Method::GET, &format!("{}/git/ref/heads/{}", repo, from)),
            )
            .await?;

        self.client
            .execute(
                "create_branch",
                self.client
                    .request(Method::POST, &format!("{}/git/refs", repo))
                    .json(&json!({
                        "ref": format!("refs/heads/{}", name),
                        "sha": base.object.sha,
                    })),
            )
            .await?;
        tracing::debug!(branch = %name, from = %from, "created GitHub branch");
        Ok(())
    }

    async fn push_files(
        &self,
        target: &ScenarioTarget,
        branch: &str,
        files: &[TriggerFile],
        message: &str,
    ) -> Result<()> {
        // The contents API commits one file per request. Replacing an
        // existing file requires its current blob sha.
        let repo = Self::repo_path(target);
        for file in files {
            let path = format!("{}/contents/{}", repo, file.path);
            let existing: Option<FileContent> = self
                .client
                .execute_lookup(
                    "push_files",
                    self.client
                        .request(Method::GET, &path)
                        .query(&[("ref", branch)]),
                )
                .await?;

            let mut body = json!({
                "message": message,
                "content": STANDARD.encode(file.content.as_bytes()),
                "branch": branch,
            });
            if let Some(existing) = existing {
                tracing::debug!(path = %file.path, "replacing existing file");
                body["sha"] = json!(existing.sha);
            }

            self.client
                .execute(
                    "push_files",
                    self.client.request(Method::PUT, &path).json(&body),
                )
                .await?;
        }
        Ok(())
    }

    async fn open_change(&self, target: &ScenarioTarget, request: &ChangeRequest) -> Result<u64> {
        let pull: Pull = self
            .client
            .execute_json(
                "open_change",
                self.client
                    .request(Method::POST, &format!("{}/pulls", Self::repo_path(target)))
                    .json(&json!({
                        "title": request.title,
                        "body": request.body,
                        "head": request.head,
                        "base": request.base,
                    })),
            )
            .await?;
        Ok(pull.number)
    }

    async fn close_change(&self, target: &ScenarioTarget, number: u64) -> Result<Removal> {
        let path = format!("{}/pulls/{}", Self::repo_path(target), number);
        let current = self
            .client
            .execute_json::<Pull>("close_change", self.client.request(Method::GET, &path))
            .await;
        match current {
            Ok(pull) if pull.state == "closed" => return Ok(Removal::AlreadyAbsent),
            Ok(_) => {}
            Err(err) if err.status() == Some(404) => return Ok(Removal::AlreadyAbsent),
            Err(err) => return Err(err),
        }

        self.client
            .execute(
                "close_change",
                self.client
                    .request(Method::PATCH, &path)
                    .json(&json!({ "state": "closed" })),
            )
            .await?;
        Ok(Removal::Removed)
    }

    async fn delete_ref(&self, target: &ScenarioTarget, name: &str) -> Result<Removal> {
        // GitHub answers 422 "Reference does not exist" for refs already deleted.
        self.client
            .execute_removal(
                "delete_ref",
                self.client.request(
                    Method::DELETE,
                    &format!("{}/git/refs/heads/{}", Self::repo_path(target), name),
                ),
                &[StatusCode::NOT_FOUND, StatusCode::UNPROCESSABLE_ENTITY],
            )
            .await
    }
}
