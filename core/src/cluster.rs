//! Namespace-scoped cluster resources for scenario isolation.
//!
//! Every object created here carries the `app.kubernetes.io/managed-by`
//! label so resources orphaned by crashed runs can be found and removed
//! out-of-band.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::teardown::Removal;

/// Label key identifying harness-managed objects.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Default value for [`MANAGED_BY_LABEL`].
pub const DEFAULT_MANAGED_BY: &str = "pipelines-as-code";

/// Opaque secret to create inside a scenario namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl SecretSpec {
    pub fn new(name: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A namespace owned by exactly one scenario.
///
/// Secrets are listed for reporting only; deleting the namespace is the
/// authoritative cleanup for everything inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralNamespace {
    pub name: String,
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl EphemeralNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secrets: Vec::new(),
        }
    }
}

/// Creates and deletes namespace-scoped objects in the target cluster.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Creates a labelled namespace.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Requests namespace deletion.
    ///
    /// Returns once the API server accepted the request; the namespace may
    /// still be terminating. A namespace that is already terminating counts
    /// as absent.
    async fn delete_namespace(&self, name: &str) -> Result<Removal>;

    /// Creates an opaque, labelled secret in `namespace`.
    async fn create_secret(&self, namespace: &str, secret: &SecretSpec) -> Result<()>;
}

/// [`ClusterProvisioner`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeProvisioner {
    client: Client,
    managed_by: String,
}

impl KubeProvisioner {
    pub fn new(client: Client, managed_by: impl Into<String>) -> Self {
        Self {
            client,
            managed_by: managed_by.into(),
        }
    }

    /// Connects using the ambient kubeconfig or in-cluster configuration.
    pub async fn connect(managed_by: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| Error::Cluster {
            operation: "connect",
            object: "cluster".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(client, managed_by))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(MANAGED_BY_LABEL.to_string(), self.managed_by.clone())])
    }
}

fn cluster_error(operation: &'static str, object: String, err: kube::Error) -> Error {
    Error::Cluster {
        operation,
        object,
        reason: err.to_string(),
    }
}

#[async_trait]
impl ClusterProvisioner for KubeProvisioner {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            ..Default::default()
        };

        tracing::info!(namespace = %name, "creating namespace");
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| cluster_error("create_namespace", name.to_string(), e))?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<Removal> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        let existing = api
            .get_opt(name)
            .await
            .map_err(|e| cluster_error("delete_namespace", name.to_string(), e))?;
        match existing {
            None => {
                tracing::debug!(namespace = %name, "namespace already absent");
                return Ok(Removal::AlreadyAbsent);
            }
            Some(ns) if ns.metadata.deletion_timestamp.is_some() => {
                tracing::debug!(namespace = %name, "namespace already terminating");
                return Ok(Removal::AlreadyAbsent);
            }
            Some(_) => {}
        }

        tracing::info!(namespace = %name, "deleting namespace");
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(Removal::Removed),
            // 409 means another delete won the race and the namespace is terminating.
            Err(kube::Error::Api(ae)) if ae.code == 404 || ae.code == 409 => {
                tracing::debug!(namespace = %name, code = ae.code, "namespace already going away");
                Ok(Removal::AlreadyAbsent)
            }
            Err(e) => Err(cluster_error("delete_namespace", name.to_string(), e)),
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &SecretSpec) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let object = Secret {
            metadata: ObjectMeta {
                name: Some(secret.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(secret.data.clone()),
            ..Default::default()
        };

        tracing::info!(namespace = %namespace, secret = %secret.name, "creating secret");
        let object_name = format!("{}/{}", namespace, secret.name);
        api.create(&PostParams::default(), &object)
            .await
            .map_err(|e| cluster_error("create_secret", object_name, e))?;
        Ok(())
    }
}
