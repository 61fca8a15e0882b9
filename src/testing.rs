//! Shared fixtures for unit tests
//!
//! [`FakeCluster`] and [`FakeVault`] wire mockall mocks to in-memory state so
//! multi-step scenarios can assert on what ended up in the cluster instead of
//! on individual calls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Namespace, PodSpec, PodTemplateSpec, Secret,
    SecretKeySelector, SecretVolumeSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{OnePasswordItem, OnePasswordItemSpec, OnePasswordItemStatus};
use crate::kube_client::MockObjectStore;
use crate::vault::{ItemField, MockVaultClient, Vault, VaultItem};
use crate::{Error, ITEM_PATH_ANNOTATION, ITEM_VERSION_ANNOTATION};

pub const VAULT_ID: &str = "vaultvaultvaultvaultvault1";
pub const ITEM_ID: &str = "itemitemitemitemitemitem01";
pub const FILE_ID: &str = "filefilefilefilefilefile01";

/// Canonical path of the fixture item
pub fn item_path() -> String {
    format!("vaults/{VAULT_ID}/items/{ITEM_ID}")
}

/// Fixture item `{username: "u", password: "p"}` at the given version
pub fn item(version: u64) -> VaultItem {
    VaultItem {
        id: ITEM_ID.to_string(),
        title: "Database".to_string(),
        vault_id: VAULT_ID.to_string(),
        version,
        tags: BTreeSet::new(),
        fields: vec![field("username", "u"), field("password", "p")],
        files: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn field(label: &str, value: &str) -> ItemField {
    ItemField {
        label: label.to_string(),
        value: value.to_string(),
    }
}

pub fn vault(id: &str, year: i32) -> Vault {
    Vault {
        id: id.to_string(),
        name: "Production".to_string(),
        created_at: Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Secret in `namespace` carrying the given annotations
pub fn secret(name: &str, namespace: &str, annotations: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(map(annotations)),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Secret previously synced from the fixture item at `version`
pub fn synced_secret(name: &str, namespace: &str, version: &str) -> Secret {
    let path = item_path();
    secret(
        name,
        namespace,
        &[
            (ITEM_PATH_ANNOTATION, path.as_str()),
            (ITEM_VERSION_ANNOTATION, version),
        ],
    )
}

pub fn namespace(name: &str, annotations: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(map(annotations)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Deployment with a single container and no secret references
pub fn deployment(name: &str, namespace: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some("app:latest".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_spec(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

/// Deployment consuming `secret` through a container env var
pub fn deployment_with_env(name: &str, namespace: &str, secret: &str) -> Deployment {
    let mut d = deployment(name, namespace);
    pod_spec(&mut d).containers[0].env = Some(vec![EnvVar {
        name: "PASSWORD".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: "password".to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    d
}

/// Deployment consuming `secret` through a pod volume
pub fn deployment_with_volume(name: &str, namespace: &str, secret: &str) -> Deployment {
    let mut d = deployment(name, namespace);
    pod_spec(&mut d).volumes = Some(vec![Volume {
        name: "creds".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    d
}

/// Add metadata annotations to a Deployment
pub fn annotate(mut deployment: Deployment, annotations: &[(&str, &str)]) -> Deployment {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .extend(map(annotations));
    deployment
}

pub fn onepassword_item(name: &str, namespace: &str, path: &str) -> OnePasswordItem {
    let mut item = OnePasswordItem::new(
        name,
        OnePasswordItemSpec {
            item_path: path.to_string(),
            secret_type: None,
        },
    );
    item.metadata.namespace = Some(namespace.to_string());
    item.metadata.uid = Some("0b5e7a3c-uid".to_string());
    item
}

type Key = (String, String);

fn key_of(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
pub struct ClusterState {
    pub secrets: BTreeMap<Key, Secret>,
    pub deployments: BTreeMap<Key, Deployment>,
    pub namespaces: Vec<Namespace>,
    pub items: BTreeMap<Key, OnePasswordItem>,
    pub secret_writes: usize,
    pub deployment_updates: Vec<String>,
    pub statuses: Vec<OnePasswordItemStatus>,
    /// Deployment names whose updates are rejected
    pub failing_updates: BTreeSet<String>,
    /// Fail every list call
    pub fail_lists: bool,
    /// Fail namespace listing only
    pub fail_namespace_lists: bool,
}

/// In-memory cluster backing a [`MockObjectStore`]
#[derive(Clone, Default)]
pub struct FakeCluster {
    pub state: Arc<Mutex<ClusterState>>,
}

fn server_error(message: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn in_scope(namespace: &Option<String>, object_ns: &str) -> bool {
    namespace.as_deref().map_or(true, |ns| ns == object_ns)
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        let key = key_of(&secret.namespace().unwrap_or_default(), &secret.name_any());
        self.state.lock().unwrap().secrets.insert(key, secret);
        self
    }

    pub fn with_deployment(self, deployment: Deployment) -> Self {
        let key = key_of(
            &deployment.namespace().unwrap_or_default(),
            &deployment.name_any(),
        );
        self.state.lock().unwrap().deployments.insert(key, deployment);
        self
    }

    pub fn with_namespace(self, namespace: Namespace) -> Self {
        self.state.lock().unwrap().namespaces.push(namespace);
        self
    }

    pub fn with_item(self, item: OnePasswordItem) -> Self {
        let key = key_of(&item.namespace().unwrap_or_default(), &item.name_any());
        self.state.lock().unwrap().items.insert(key, item);
        self
    }

    pub fn failing_update(self, deployment: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_updates
            .insert(deployment.to_string());
        self
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key_of(namespace, name))
            .cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&key_of(namespace, name))
            .cloned()
    }

    pub fn secret_writes(&self) -> usize {
        self.state.lock().unwrap().secret_writes
    }

    pub fn deployment_updates(&self) -> Vec<String> {
        self.state.lock().unwrap().deployment_updates.clone()
    }

    pub fn statuses(&self) -> Vec<OnePasswordItemStatus> {
        self.state.lock().unwrap().statuses.clone()
    }

    /// A mock store reading and writing this cluster's state
    pub fn store(&self) -> MockObjectStore {
        let mut mock = MockObjectStore::new();

        let state = self.state.clone();
        mock.expect_get_secret().returning(move |name, ns| {
            Ok(state.lock().unwrap().secrets.get(&key_of(ns, name)).cloned())
        });

        let state = self.state.clone();
        mock.expect_list_secrets().returning(move |ns| {
            let state = state.lock().unwrap();
            if state.fail_lists {
                return Err(server_error("list failed"));
            }
            Ok(state
                .secrets
                .iter()
                .filter(|((secret_ns, _), _)| in_scope(&ns, secret_ns))
                .map(|(_, s)| s.clone())
                .collect())
        });

        let state = self.state.clone();
        mock.expect_create_secret().returning(move |secret| {
            let mut state = state.lock().unwrap();
            let key = key_of(&secret.namespace().unwrap_or_default(), &secret.name_any());
            if state.secrets.contains_key(&key) {
                return Err(Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "already exists".to_string(),
                    reason: "AlreadyExists".to_string(),
                    code: 409,
                })));
            }
            state.secret_writes += 1;
            state.secrets.insert(key, secret.clone());
            Ok(())
        });

        let state = self.state.clone();
        mock.expect_update_secret().returning(move |secret| {
            let mut state = state.lock().unwrap();
            let key = key_of(&secret.namespace().unwrap_or_default(), &secret.name_any());
            if !state.secrets.contains_key(&key) {
                return Err(server_error("update of missing secret"));
            }
            state.secret_writes += 1;
            state.secrets.insert(key, secret.clone());
            Ok(())
        });

        let state = self.state.clone();
        mock.expect_delete_secret().returning(move |name, ns| {
            state.lock().unwrap().secrets.remove(&key_of(ns, name));
            Ok(())
        });

        let state = self.state.clone();
        mock.expect_list_deployments().returning(move |ns| {
            let state = state.lock().unwrap();
            if state.fail_lists {
                return Err(server_error("list failed"));
            }
            Ok(state
                .deployments
                .iter()
                .filter(|((deployment_ns, _), _)| in_scope(&ns, deployment_ns))
                .map(|(_, d)| d.clone())
                .collect())
        });

        let state = self.state.clone();
        mock.expect_update_deployment().returning(move |deployment| {
            let mut state = state.lock().unwrap();
            let name = deployment.name_any();
            if state.failing_updates.contains(&name) {
                return Err(server_error("update rejected"));
            }
            let key = key_of(&deployment.namespace().unwrap_or_default(), &name);
            state.deployments.insert(key, deployment.clone());
            state.deployment_updates.push(name);
            Ok(())
        });

        let state = self.state.clone();
        mock.expect_set_deployment_finalizers()
            .returning(move |name, ns, finalizers| {
                let mut state = state.lock().unwrap();
                if let Some(d) = state.deployments.get_mut(&key_of(ns, name)) {
                    d.metadata.finalizers = Some(finalizers);
                }
                Ok(())
            });

        let state = self.state.clone();
        mock.expect_list_namespaces().returning(move || {
            let state = state.lock().unwrap();
            if state.fail_lists || state.fail_namespace_lists {
                return Err(server_error("list failed"));
            }
            Ok(state.namespaces.clone())
        });

        let state = self.state.clone();
        mock.expect_get_item().returning(move |name, ns| {
            Ok(state.lock().unwrap().items.get(&key_of(ns, name)).cloned())
        });

        let state = self.state.clone();
        mock.expect_set_item_finalizers()
            .returning(move |name, ns, finalizers| {
                let mut state = state.lock().unwrap();
                if let Some(item) = state.items.get_mut(&key_of(ns, name)) {
                    item.metadata.finalizers = Some(finalizers);
                }
                Ok(())
            });

        let state = self.state.clone();
        mock.expect_patch_item_status()
            .returning(move |name, ns, status| {
                let mut state = state.lock().unwrap();
                state.statuses.push(status.clone());
                if let Some(item) = state.items.get_mut(&key_of(ns, name)) {
                    item.status = Some(status.clone());
                }
                Ok(())
            });

        mock
    }
}

/// In-memory vault backing a [`MockVaultClient`]
///
/// Items are addressed by ID only; title lookups resolve against item titles.
#[derive(Clone, Default)]
pub struct FakeVault {
    pub items: Arc<Mutex<BTreeMap<String, VaultItem>>>,
    /// Item IDs whose lookups fail with this error kind
    pub failures: Arc<Mutex<BTreeMap<String, bool>>>,
    pub lookups: Arc<Mutex<usize>>,
}

impl FakeVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, item: VaultItem) -> Self {
        self.put(item);
        self
    }

    /// Insert or replace an item, e.g. to simulate an upstream edit
    pub fn put(&self, item: VaultItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    /// Make lookups of `item_id` fail; `rate_limited` selects the error kind
    pub fn fail(&self, item_id: &str, rate_limited: bool) {
        self.failures
            .lock()
            .unwrap()
            .insert(item_id.to_string(), rate_limited);
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }

    pub fn client(&self) -> MockVaultClient {
        let mut mock = MockVaultClient::new();

        let items = self.items.clone();
        let failures = self.failures.clone();
        let lookups = self.lookups.clone();
        mock.expect_get_item_by_id().returning(move |vault_id, item_id| {
            *lookups.lock().unwrap() += 1;
            match failures.lock().unwrap().get(item_id) {
                Some(true) => return Err(Error::rate_limited("429 Too Many Requests")),
                Some(false) => return Err(Error::vault("connection refused")),
                None => {}
            }
            items
                .lock()
                .unwrap()
                .get(item_id)
                .filter(|i| i.vault_id == vault_id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("item {item_id}")))
        });

        let items = self.items.clone();
        mock.expect_get_items_by_title().returning(move |vault_id, title| {
            Ok(items
                .lock()
                .unwrap()
                .values()
                .filter(|i| i.vault_id == vault_id && i.title == title)
                .cloned()
                .collect())
        });

        mock.expect_get_file_content()
            .returning(|_, _, file_id| Ok(format!("content of {file_id}").into_bytes()));

        mock.expect_get_vaults_by_title()
            .returning(|_| Ok(vec![vault(VAULT_ID, 2020)]));

        mock
    }
}
