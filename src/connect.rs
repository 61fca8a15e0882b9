//! Optional auto-deployment of the Connect server
//!
//! When enabled, the operator server-side applies a two-container Connect
//! Deployment (API + sync) and a Service in its own namespace at startup.
//! Credentials come from the `op-credentials` Secret, which the user creates.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec,
    PodTemplateSpec, SecretKeySelector, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

use crate::{Error, FIELD_MANAGER};

/// Name of the Connect Deployment and Service
pub const CONNECT_NAME: &str = "onepassword-connect";

/// Secret holding the Connect credentials file
pub const CREDENTIALS_SECRET: &str = "op-credentials";

/// Key of the credentials file inside [`CREDENTIALS_SECRET`]
pub const CREDENTIALS_KEY: &str = "1password-credentials.json";

const API_IMAGE: &str = "1password/connect-api:latest";
const SYNC_IMAGE: &str = "1password/connect-sync:latest";
const API_PORT: i32 = 8080;
const SYNC_PORT: i32 = 8081;
const API_BUS_PORT: i32 = 11220;
const SYNC_BUS_PORT: i32 = 11221;
const DATA_VOLUME: &str = "shared-data";
const DATA_PATH: &str = "/home/opuser/.op/data";

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), CONNECT_NAME.to_string())])
}

fn env(name: &str, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn connect_container(
    name: &str,
    image: &str,
    http_port: i32,
    bus_port: i32,
    peer: i32,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: http_port,
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "OP_SESSION".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: CREDENTIALS_SECRET.to_string(),
                        key: CREDENTIALS_KEY.to_string(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            env("OP_HTTP_PORT", http_port),
            env("OP_BUS_PORT", bus_port),
            env("OP_BUS_PEERS", format!("localhost:{peer}")),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// The Connect Deployment for `namespace`
pub fn connect_deployment(namespace: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(CONNECT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![
                        connect_container(
                            "connect-api",
                            API_IMAGE,
                            API_PORT,
                            API_BUS_PORT,
                            SYNC_BUS_PORT,
                        ),
                        connect_container(
                            "connect-sync",
                            SYNC_IMAGE,
                            SYNC_PORT,
                            SYNC_BUS_PORT,
                            API_BUS_PORT,
                        ),
                    ],
                    volumes: Some(vec![Volume {
                        name: DATA_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The Service exposing the Connect API and sync ports
pub fn connect_service(namespace: &str) -> Service {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(CONNECT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(labels()),
            ports: Some(vec![
                port("connect-api", API_PORT),
                port("connect-sync", SYNC_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Server-side apply the Connect Deployment and Service
pub async fn ensure_connect(client: &Client, namespace: &str) -> Result<(), Error> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    deployments
        .patch(
            CONNECT_NAME,
            &params,
            &Patch::Apply(&connect_deployment(namespace)),
        )
        .await?;

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    services
        .patch(CONNECT_NAME, &params, &Patch::Apply(&connect_service(namespace)))
        .await?;

    info!(namespace = %namespace, "Connect server deployed");
    Ok(())
}
