//! Kubernetes-backed platform adapter.
//!
//! Config maps, secrets, ingresses and deployments go through typed APIs.
//! CI integration objects and the component catalog are third-party CRDs
//! and are handled as `DynamicObject`s.

use super::{ApplyOutcome, CatalogEntry, ObjectTarget, PlatformAdapter, PlatformError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

const CI_API_VERSION: &str = "v2.edp.epam.com/v1";
const CATALOG_API_VERSION: &str = "v1.edp.epam.com/v1";

/// Interval between ingress lookups while resolving an endpoint
const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = api_version
        .split_once('/')
        .map_or((String::new(), api_version.to_string()), |(g, v)| {
            (g.to_string(), v.to_string())
        });
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}

/// Polls the ingress until one of its rules carries a host.
async fn wait_for_host(api: &Api<Ingress>, name: &str) -> Result<String, PlatformError> {
    loop {
        let host = api.get_opt(name).await?.and_then(|ingress| {
            ingress
                .spec?
                .rules?
                .into_iter()
                .find_map(|rule| rule.host.filter(|h| !h.is_empty()))
        });
        if let Some(host) = host {
            return Ok(host);
        }
        sleep(ENDPOINT_POLL_INTERVAL).await;
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 409)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

/// Platform adapter talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    /// Creates an adapter on top of an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    /// Creates a dynamic object unless one with the same name exists.
    async fn create_dynamic_if_absent(
        &self,
        namespace: &str,
        resource: &ApiResource,
        name: &str,
        spec: serde_json::Value,
    ) -> Result<ObjectTarget, PlatformError> {
        let api = self.dynamic_api(namespace, resource);
        let target = ObjectTarget {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            name: name.to_string(),
        };

        if api.get_opt(name).await?.is_some() {
            debug!("{} {}/{} already exists", resource.kind, namespace, name);
            return Ok(target);
        }

        let obj = DynamicObject::new(name, resource)
            .within(namespace)
            .data(serde_json::json!({ "spec": spec }));
        match api.create(&PostParams::default(), &obj).await {
            Ok(_) => {
                info!("Created {} {}/{}", resource.kind, namespace, name);
                Ok(target)
            }
            Err(e) if is_conflict(&e) => Ok(target),
            Err(e) => Err(e.into()),
        }
    }

    fn resource_for(target: &ObjectTarget) -> ApiResource {
        let plural = format!("{}s", target.kind.to_lowercase());
        api_resource(&target.api_version, &target.kind, &plural)
    }
}

#[async_trait]
impl PlatformAdapter for KubePlatform {
    async fn ensure_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        owner: &OwnerReference,
    ) -> Result<ApplyOutcome, PlatformError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        if let Some(existing) = api.get_opt(name).await? {
            let current = existing.data.unwrap_or_default();
            if current == data {
                return Ok(ApplyOutcome::Unchanged);
            }
            // Merge patch: null removes keys that are no longer rendered
            let mut patch = serde_json::Map::new();
            for key in current.keys().filter(|k| !data.contains_key(*k)) {
                patch.insert(key.clone(), serde_json::Value::Null);
            }
            for (key, value) in &data {
                patch.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
            api.patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(serde_json::json!({ "data": patch })),
            )
            .await?;
            info!("Updated ConfigMap {}/{}", namespace, name);
            return Ok(ApplyOutcome::Updated);
        }

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        api.create(&PostParams::default(), &config_map).await?;
        info!("Created ConfigMap {}/{}", namespace, name);
        Ok(ApplyOutcome::Created)
    }

    async fn ensure_ci_script(&self, namespace: &str, name: &str, config_map: &str) -> Result<ObjectTarget, PlatformError> {
        let resource = api_resource(CI_API_VERSION, "JenkinsScript", "jenkinsscripts");
        self.create_dynamic_if_absent(
            namespace,
            &resource,
            name,
            serde_json::json!({ "sourceConfigMapName": config_map }),
        )
        .await
    }

    async fn ensure_ci_service_account(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        credentials_secret: &str,
    ) -> Result<ObjectTarget, PlatformError> {
        let resource = api_resource(CI_API_VERSION, "JenkinsServiceAccount", "jenkinsserviceaccounts");
        self.create_dynamic_if_absent(
            namespace,
            &resource,
            name,
            serde_json::json!({ "type": kind, "credentials": credentials_secret }),
        )
        .await
    }

    async fn ensure_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        owner: &OwnerReference,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!("Created Secret {}/{}", namespace, name);
                Ok(data)
            }
            Err(e) if is_conflict(&e) => {
                debug!("Secret {}/{} already exists, keeping it", namespace, name);
                self.read_secret(namespace, name).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_endpoint(&self, namespace: &str, name: &str, deadline: Duration) -> Result<String, PlatformError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);

        match timeout(deadline, wait_for_host(&api, name)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::EndpointUnresolved(format!(
                "no host on Ingress {}/{} after {:?}",
                namespace, name, deadline
            ))),
        }
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(e) if is_not_found(&e) => {
                return Err(PlatformError::NotFound(format!("secret {}/{}", namespace, name)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    async fn set_owner(&self, namespace: &str, target: &ObjectTarget, owner: &OwnerReference) -> Result<(), PlatformError> {
        let resource = Self::resource_for(target);
        let api = self.dynamic_api(namespace, &resource);
        let obj = api.get(&target.name).await?;

        let mut owners = obj.metadata.owner_references.unwrap_or_default();
        if owners.iter().any(|o| o.uid == owner.uid) {
            return Ok(());
        }
        owners.push(owner.clone());

        // A merge patch replaces the whole list, so send the full set
        let patch = serde_json::json!({ "metadata": { "ownerReferences": owners } });
        api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Set owner of {} {}/{}", target.kind, namespace, target.name);
        Ok(())
    }

    async fn ensure_catalog_entry(&self, namespace: &str, entry: &CatalogEntry) -> Result<(), PlatformError> {
        let resource = api_resource(CATALOG_API_VERSION, "EDPComponent", "edpcomponents");
        self.create_dynamic_if_absent(
            namespace,
            &resource,
            &entry.name,
            serde_json::json!({
                "type": "sonar",
                "url": entry.url,
                "icon": entry.icon,
                "visible": true,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn ready_replicas(&self, namespace: &str, name: &str) -> Result<Option<i32>, PlatformError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(deployment) => Ok(deployment.status.and_then(|s| s.ready_replicas)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
