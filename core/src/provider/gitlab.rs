//! Self-hosted GitLab REST adapter.

use async_trait::async_trait;
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
    username: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryFile {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    state: String,
}

/// Adapter for the GitLab v4 API, authenticated with a private token.
pub struct GitLabAdapter {
    client: RestClient,
    session: ProviderSession,
}

impl GitLabAdapter {
    pub async fn connect(config: &ProviderConfig) -> Result<Self> {
        let client = RestClient::new(
            ProviderKind::GitLab,
            &config.api_url,
            Auth::PrivateToken(config.token.clone()),
        )?;
        let user: User = client.current_user("/user").await?;
        let session = ProviderSession {
            kind: ProviderKind::GitLab,
            api_url: client.base_url().to_string(),
            credential: config.token.clone(),
            user: user.username,
        };
        Ok(Self { client, session })
    }

    /// Projects are addressed by their URL-encoded full path.
    fn project_path(target: &ScenarioTarget) -> String {
        format!("/projects/{}", urlencoding::encode(&target.full_name()))
    }
}

#[async_trait]
impl ProviderAdapter for GitLabAdapter {
    fn session(&self) -> &ProviderSession {
        &self.session
    }

    async fn create_branch(&self, target: &ScenarioTarget, name: &str, from: &str) -> Result<()> {
        self.client
            .execute(
                "create_branch",
                self.client
                    .request(
                        Method::POST,
                        &format!("{}/repository/branches", Self::project_path(target)),
                    )
                    .query(&[("branch", name), ("ref", from)]),
            )
            .await?;
        tracing::debug!(branch = %name, from = %from, "created GitLab branch");
        Ok(())
    }

    async fn push_files(
        &self,
        target: &ScenarioTarget,
        branch: &str,
        files: &[TriggerFile],
        message: &str,
    ) -> Result<()> {
        let project = Self::project_path(target);
        let mut actions = Vec::with_capacity(files.len());
        for file in files {
            let existing: Option<RepositoryFile> = self
                .client
                .execute_lookup(
                    "push_files",
                    self.client
                        .request(
                            Method::GET,
                            &format!(
                                "{}/repository/files/{}",
                                project,
                                urlencoding::encode(&file.path)
                            ),
                        )
                        .query(&[("ref", branch)]),
                )
                .await?;
            let action = match existing {
                Some(found) => {
                    tracing::debug!(path = %found.file_path, "updating existing file");
                    "update"
                }
                None => "create",
            };
            actions.push(json!({
                "action": action,
                "file_path": file.path,
                "content": file.content,
            }));
        }

        self.client
            .execute(
                "push_files",
                self.client
                    .request(Method::POST, &format!("{}/repository/commits", project))
                    .json(&json!({
                        "branch": branch,
                        "commit_message": message,
                        "actions": actions,
                    })),
            )
            .await?;
        Ok(())
    }

    async fn open_change(&self, target: &ScenarioTarget, request: &ChangeRequest) -> Result<u64> {
        let mr: MergeRequest = self
            .client
            .execute_json(
                "open_change",
                self.client
                    .request(
                        Method::POST,
                        &format!("{}/merge_requests", Self::project_path(target)),
                    )
                    .json(&json!({
                        "title": request.title,
                        "description": request.body,
                        "source_branch": request.head,
                        "target_branch": request.base,
                    })),
            )
            .await?;
        Ok(mr.iid)
    }

    async fn close_change(&self, target: &ScenarioTarget, number: u64) -> Result<Removal> {
        let path = format!("{}/merge_requests/{}", Self::project_path(target), number);
        let current = self
            .client
            .execute_json::<MergeRequest>("close_change", self.client.request(Method::GET, &path))
            .await;
        match current {
            Ok(mr) if mr.state != "opened" => return Ok(Removal::AlreadyAbsent),
            Ok(_) => {}
            Err(err) if err.status() == Some(404) => return Ok(Removal::AlreadyAbsent),
            Err(err) => return Err(err),
        }

        self.client
            .execute(
                "close_change",
                self.client
                    .request(Method::PUT, &path)
                    .json(&json!({ "state_event": "close" })),
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
                    &format!(
                        "{}/repository/branches/{}",
                        Self::project_path(target),
                        urlencoding::encode(name)
                    ),
                ),
                &[StatusCode::NOT_FOUND],
            )
            .await
    }
}
