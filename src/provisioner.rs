//! Connector provisioning
//!
//! Ensures a single `controlled-cloudflared-connector` Deployment exists in a
//! namespace. Provisioning is a forward-only pipeline:
//!
//! 1. list Deployments carrying the discriminator label, stop if any exist
//! 2. assemble the optional CA trust pool volume and mount
//! 3. fetch a fresh tunnel token
//! 4. validate the connector configuration
//! 5. build the Deployment
//! 6. create it
//!
//! The list and the create are not atomic. Two concurrent calls can both pass
//! the existence check; the Deployment name is fixed, so the API server
//! rejects the loser's create with `409 AlreadyExists`. The loser then lists
//! again and reports [`ProvisionOutcome::AlreadyPresent`] only if a labelled
//! connector is now visible. A same-named Deployment without the
//! discriminator label is not a connector, so that conflict is an error.
//! Callers that need stronger guarantees must serialize provisioning
//! themselves.

use std::future::Future;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::ConnectorConfig;
use crate::credentials::CredentialSource;
use crate::trust_pool::{TrustPool, TrustVolume};
use crate::workload::{connector_deployment, connector_selector, CONNECTOR_NAME};
use crate::{Error, Result};

/// Field manager recorded on objects this crate creates
pub const FIELD_MANAGER: &str = "cloudflared-connector";

/// Trait abstracting the Kubernetes operations provisioning needs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of Deployments in `namespace` matching `label_selector`
    async fn list_connectors(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> std::result::Result<Vec<String>, kube::Error>;

    /// Create a Deployment in `namespace`
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> std::result::Result<(), kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a new KubeObjectStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn list_connectors(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> std::result::Result<Vec<String>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items.iter().map(|d| d.name_any()).collect())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> std::result::Result<(), kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, deployment).await?;
        Ok(())
    }
}

/// Result of a successful provisioning call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A connector already existed; nothing was fetched or created
    AlreadyPresent,
    /// A new connector Deployment was created
    Created,
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: &str,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(step)),
        out = fut => Ok(out),
    }
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Ensure the connector Deployment exists in `namespace`
///
/// Idempotent: when a Deployment with the discriminator label is already
/// present the call returns [`ProvisionOutcome::AlreadyPresent`] without
/// fetching a token. No cleanup happens on failure; a token fetched before a
/// failed create is dropped.
#[instrument(skip(cancel, store, credentials, trust_pool, config))]
pub async fn provision(
    cancel: &CancellationToken,
    store: &dyn ObjectStore,
    credentials: &dyn CredentialSource,
    namespace: &str,
    trust_pool: Option<&TrustPool>,
    config: &ConnectorConfig,
) -> Result<ProvisionOutcome> {
    if namespace.is_empty() {
        return Err(Error::configuration_for_field(
            "namespace",
            "connector namespace must not be empty",
        ));
    }

    let list_step = format!("list {CONNECTOR_NAME} in namespace {namespace}");
    let existing = cancellable(
        cancel,
        &list_step,
        store.list_connectors(namespace, &connector_selector()),
    )
    .await?
    .map_err(|e| Error::infrastructure(list_step.clone(), e))?;

    if !existing.is_empty() {
        debug!(?existing, "connector already present");
        return Ok(ProvisionOutcome::AlreadyPresent);
    }

    let trust_volume: Option<TrustVolume> = trust_pool.map(|pool| {
        debug!(source = ?pool.source, mount_path = %pool.mount_path, "mounting CA trust pool");
        pool.trust_volume()
    });

    let token = cancellable(cancel, "fetch tunnel token", credentials.fetch_credential())
        .await?
        .map_err(|e| Error::upstream("fetch tunnel token", e))?;

    let resolved = config.resolve()?;

    let deployment = connector_deployment(&token, namespace, &resolved, trust_volume.as_ref());

    let create_step = format!("create {CONNECTOR_NAME} deployment");
    match cancellable(
        cancel,
        &create_step,
        store.create_deployment(namespace, &deployment),
    )
    .await?
    {
        Ok(()) => {
            info!(replicas = resolved.replicas, "created connector deployment");
            Ok(ProvisionOutcome::Created)
        }
        Err(e) if is_already_exists(&e) => {
            // the name is taken; only a labelled connector counts as present
            let present = cancellable(
                cancel,
                &list_step,
                store.list_connectors(namespace, &connector_selector()),
            )
            .await?
            .map_err(|list_err| Error::infrastructure(list_step.clone(), list_err))?;

            if present.is_empty() {
                warn!("{CONNECTOR_NAME} exists without the connector label");
                return Err(Error::infrastructure(create_step, e));
            }
            info!("connector deployment created concurrently");
            Ok(ProvisionOutcome::AlreadyPresent)
        }
        Err(e) => Err(Error::infrastructure(create_step, e)),
    }
}
