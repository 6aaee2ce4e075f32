//! Connector Deployment manifest
//!
//! Builds the `controlled-cloudflared-connector` Deployment. The output is a
//! pure function of its inputs so the same credential, namespace and
//! configuration always yield the same object.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::config::ResolvedConnectorConfig;
use crate::trust_pool::TrustVolume;

/// Name of the Deployment, its pods and its container
pub const CONNECTOR_NAME: &str = "controlled-cloudflared-connector";

/// Label key marking connectors created by this controller
pub const DISCRIMINATOR_LABEL_KEY: &str = "strrl.dev/cloudflare-tunnel-ingress-controller";

/// Label value marking connectors created by this controller
pub const DISCRIMINATOR_LABEL_VALUE: &str = "controlled-cloudflared-connector";

/// Label key used by the Deployment selector
pub const APP_LABEL_KEY: &str = "app";

/// Address cloudflared serves Prometheus metrics on
pub const METRICS_ADDRESS: &str = "0.0.0.0:44483";

/// Label selector matching existing connectors, in Kubernetes query syntax
pub fn connector_selector() -> String {
    format!("{DISCRIMINATOR_LABEL_KEY}={DISCRIMINATOR_LABEL_VALUE}")
}

fn selector_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), CONNECTOR_NAME.to_string())])
}

fn connector_labels() -> BTreeMap<String, String> {
    let mut labels = selector_labels();
    labels.insert(
        DISCRIMINATOR_LABEL_KEY.to_string(),
        DISCRIMINATOR_LABEL_VALUE.to_string(),
    );
    labels
}

/// cloudflared command line; the token is always the final argument
pub fn connector_command(token: &str) -> Vec<String> {
    [
        "cloudflared",
        "--no-autoupdate",
        "tunnel",
        "--metrics",
        METRICS_ADDRESS,
        "run",
        "--token",
        token,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Build the connector Deployment
///
/// When `trust_volume` is `None` the pod carries no volumes and the container
/// no volume mounts.
pub fn connector_deployment(
    token: &str,
    namespace: &str,
    config: &ResolvedConnectorConfig,
    trust_volume: Option<&TrustVolume>,
) -> Deployment {
    let (volumes, volume_mounts) = match trust_volume {
        Some(tv) => (Some(vec![tv.volume.clone()]), Some(vec![tv.mount.clone()])),
        None => (None, None),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(CONNECTOR_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(connector_labels()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(CONNECTOR_NAME.to_string()),
                    labels: Some(connector_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONNECTOR_NAME.to_string(),
                        image: Some(config.image.clone()),
                        image_pull_policy: config.image_pull_policy.clone(),
                        command: Some(connector_command(token)),
                        volume_mounts,
                        ..Default::default()
                    }],
                    restart_policy: Some("Always".to_string()),
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
