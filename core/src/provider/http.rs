//! Shared REST plumbing for provider adapters.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::teardown::Removal;

use super::{Credential, ProviderKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("pac-e2e/", env!("CARGO_PKG_VERSION"));

/// How requests authenticate against the provider.
#[derive(Debug, Clone)]
pub(crate) enum Auth {
    Bearer(Credential),
    Basic { user: String, token: Credential },
    PrivateToken(Credential),
}

/// Thin wrapper over `reqwest` that maps failures to [`Error::Provider`].
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    kind: ProviderKind,
    base_url: String,
    auth: Auth,
    http: reqwest::Client,
}

impl RestClient {
    pub(crate) fn new(kind: ProviderKind, base_url: &str, auth: Auth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build {} HTTP client: {}", kind, e)))?;
        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Starts an authenticated request against `path` (relative to the base URL).
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token.expose()),
            Auth::Basic { user, token } => builder.basic_auth(user, Some(token.expose())),
            Auth::PrivateToken(token) => builder.header("PRIVATE-TOKEN", token.expose()),
        }
    }

    /// Sends a request, failing on transport errors and non-2xx statuses.
    pub(crate) async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.error(operation, None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.error(
            operation,
            Some(status),
            format!("HTTP {}: {}", status, truncate(body.trim())),
        ))
    }

    /// Sends a request and decodes a JSON body.
    pub(crate) async fn execute_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.execute(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| self.error(operation, None, format!("invalid response body: {}", e)))
    }

    /// Sends a delete-like request; the listed statuses mean "already gone".
    pub(crate) async fn execute_removal(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        absent: &[StatusCode],
    ) -> Result<Removal> {
        match self.execute(operation, request).await {
            Ok(_) => Ok(Removal::Removed),
            Err(err) if is_absent(&err, absent) => Ok(Removal::AlreadyAbsent),
            Err(err) => Err(err),
        }
    }

    /// Fetches a JSON resource that may not exist; 404 is `None`.
    pub(crate) async fn execute_lookup<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Option<T>> {
        match self.execute_json(operation, request).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.status() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fetches the acting user, mapping 401/403 to [`Error::Auth`].
    pub(crate) async fn current_user<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(Method::GET, path);
        match self.execute_json("authenticate", request).await {
            Ok(user) => Ok(user),
            Err(err) if matches!(err.status(), Some(401) | Some(403)) => Err(Error::Auth {
                provider: self.kind,
                reason: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn error(
        &self,
        operation: &'static str,
        status: Option<StatusCode>,
        reason: String,
    ) -> Error {
        Error::Provider {
            provider: self.kind,
            operation,
            status: status.map(|s| s.as_u16()),
            reason,
        }
    }
}

/// True when `err` is a provider error carrying one of the `absent` statuses.
pub(crate) fn is_absent(err: &Error, absent: &[StatusCode]) -> bool {
    err.status()
        .map(|code| absent.iter().any(|s| s.as_u16() == code))
        .unwrap_or(false)
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
