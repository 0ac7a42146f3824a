//! Test utilities for unit testing reconcilers
//!
//! This module provides an in-memory resource store and fixture builders.

use crate::clients::MockClientProvider;
use crate::error::ControllerError;
use crate::platform::mock::MockPlatform;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::status::ResourceStore;
use async_trait::async_trait;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use sonar_client::MockSonarClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory stand-in for the API server's view of one resource kind.
///
/// Tracks `resourceVersion` and `generation` the way the API server does:
/// every write bumps the version, spec edits also bump the generation.
/// Status writes are merged into the stored status, so a field left out of
/// the patch keeps its old value.
pub struct FakeStore<K> {
    objects: Mutex<HashMap<String, K>>,
    version: AtomicUsize,
    patches: AtomicUsize,
    pending_conflicts: AtomicUsize,
}

impl<K> FakeStore<K>
where
    K: Resource + StatusOwner + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            version: AtomicUsize::new(1),
            patches: AtomicUsize::new(0),
            pending_conflicts: AtomicUsize::new(0),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Stores `obj`, assigning a fresh resourceVersion.
    pub fn insert(&self, mut obj: K) {
        obj.meta_mut().resource_version = Some(self.next_version());
        if obj.meta().generation.is_none() {
            obj.meta_mut().generation = Some(1);
        }
        self.objects.lock().unwrap().insert(obj.name_any(), obj);
    }

    pub fn get(&self, name: &str) -> Option<K> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn status_of(&self, name: &str) -> Option<K::Status> {
        self.get(name).and_then(|obj| obj.current_status().cloned())
    }

    /// Successful status writes so far.
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    /// Makes the next `n` status writes lose against a concurrent writer.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Applies a user edit to the stored object.
    pub fn edit_spec(&self, name: &str, edit: impl FnOnce(&mut K)) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(name).expect("object to edit must exist");
        edit(obj);
        let meta = obj.meta_mut();
        meta.generation = Some(meta.generation.unwrap_or(1) + 1);
        meta.resource_version = Some(version);
    }
}

#[async_trait]
impl<K> ResourceStore<K> for FakeStore<K>
where
    K: Resource + StatusOwner + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, name: &str) -> Result<K, ControllerError> {
        self.get(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))
    }

    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: serde_json::Value,
    ) -> Result<(), ControllerError> {
        let concurrent_write = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let version = self.next_version();

        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;

        if concurrent_write {
            obj.meta_mut().resource_version = Some(version);
            return Err(ControllerError::Conflict(format!(
                "the object {} has been modified",
                name
            )));
        }
        if resource_version.is_some() && resource_version != obj.meta().resource_version {
            return Err(ControllerError::Conflict(format!(
                "stale resourceVersion for {}",
                name
            )));
        }

        let mut merged = match obj.current_status() {
            Some(current) => serde_json::to_value(current)?,
            None => serde_json::Value::Null,
        };
        merge_patch(&mut merged, &status);
        *obj.status_mut() = Some(serde_json::from_value(merged)?);
        obj.meta_mut().resource_version = Some(version);
        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Applies a JSON merge patch (RFC 7386) to `target`, as the API server does.
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let Some(fields) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let Some(object) = target.as_object_mut() {
        for (key, value) in fields {
            if value.is_null() {
                object.remove(key);
            } else {
                merge_patch(object.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
    }
}

/// A reconciler wired to in-memory fakes, with handles on each fake.
pub struct TestHarness {
    pub platform: Arc<MockPlatform>,
    pub client: Arc<MockSonarClient>,
    pub sonars: Arc<FakeStore<Sonar>>,
    pub templates: Arc<FakeStore<SonarPermissionTemplate>>,
    pub reconciler: Reconciler,
}

impl TestHarness {
    pub fn new() -> Self {
        let platform = Arc::new(MockPlatform::new());
        let client = Arc::new(MockSonarClient::new("http://sonar.default:9000"));
        let sonars = Arc::new(FakeStore::<Sonar>::new());
        let templates = Arc::new(FakeStore::<SonarPermissionTemplate>::new());

        let reconciler = Reconciler::new(
            platform.clone(),
            Arc::new(MockClientProvider(client.as_ref().clone())),
            sonars.clone(),
            templates.clone(),
            ReconcilerSettings::default(),
        );

        Self {
            platform,
            client,
            sonars,
            templates,
            reconciler,
        }
    }
}

/// Helper to create a test Sonar CRD
pub fn create_test_sonar(name: &str, namespace: &str) -> Sonar {
    Sonar {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            generation: Some(1),
            ..Default::default()
        },
        spec: SonarSpec {
            dns_wildcard: "*.apps.example.com".to_string(),
            base_path: None,
            default_permission_template: None,
        },
        status: None,
    }
}

/// Helper to create an available Sonar CRD
pub fn create_available_sonar(name: &str, namespace: &str) -> Sonar {
    let mut sonar = create_test_sonar(name, namespace);
    sonar.status = Some(SonarStatus {
        available: true,
        status: SonarPhase::Ready,
        external_url: Some(format!("https://{}", sonar.computed_host())),
        ..Default::default()
    });
    sonar
}

/// Helper to create a test SonarPermissionTemplate CRD
pub fn create_test_template(
    name: &str,
    namespace: &str,
    sonar_owner: &str,
    bindings: &[(&str, &[Permission])],
) -> SonarPermissionTemplate {
    SonarPermissionTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            generation: Some(1),
            ..Default::default()
        },
        spec: SonarPermissionTemplateSpec {
            sonar_owner: sonar_owner.to_string(),
            name: format!("{}-template", name),
            project_key_pattern: ".*".to_string(),
            description: Some("managed by test".to_string()),
            group_permissions: bindings
                .iter()
                .map(|(group, perms)| GroupPermission {
                    group_name: group.to_string(),
                    permissions: perms.to_vec(),
                })
                .collect(),
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::publish_status;

    fn ready(current: &Sonar) -> SonarStatus {
        SonarStatus {
            available: true,
            status: SonarPhase::Ready,
            external_url: current.status.as_ref().and_then(|s| s.external_url.clone()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_skips_unchanged_status() {
        let store = FakeStore::<Sonar>::new();
        store.insert(create_test_sonar("sonar", "default"));

        publish_status(&store, "sonar", ready).await.unwrap();
        publish_status(&store, "sonar", ready).await.unwrap();

        assert_eq!(store.patch_count(), 1);
        assert!(store.status_of("sonar").unwrap().available);
    }

    #[tokio::test]
    async fn test_publish_retries_one_conflict() {
        let store = FakeStore::<Sonar>::new();
        store.insert(create_test_sonar("sonar", "default"));
        store.inject_conflicts(1);

        publish_status(&store, "sonar", ready).await.unwrap();
        assert_eq!(store.patch_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_second_conflict() {
        let store = FakeStore::<Sonar>::new();
        store.insert(create_test_sonar("sonar", "default"));
        store.inject_conflicts(2);

        let err = publish_status(&store, "sonar", ready).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert_eq!(store.patch_count(), 0);
        assert!(store.status_of("sonar").is_none());
    }

    #[tokio::test]
    async fn test_publish_does_not_touch_spec() {
        let store = FakeStore::<Sonar>::new();
        store.insert(create_test_sonar("sonar", "default"));
        store.edit_spec("sonar", |s| s.spec.base_path = Some("/sonar".to_string()));

        publish_status(&store, "sonar", ready).await.unwrap();

        let stored = store.get("sonar").unwrap();
        assert_eq!(stored.spec.base_path.as_deref(), Some("/sonar"));
        assert_eq!(stored.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_publish_missing_resource_is_not_found() {
        let store = FakeStore::<Sonar>::new();
        let err = publish_status(&store, "ghost", ready).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_patch_merges_like_the_api_server() {
        let store = FakeStore::<Sonar>::new();
        store.insert(create_test_sonar("sonar", "default"));
        publish_status(&store, "sonar", |_: &Sonar| SonarStatus {
            message: Some("endpoint unresolved".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

        // A field missing from the patch body survives the write
        store
            .patch_status("sonar", None, serde_json::json!({ "available": true }))
            .await
            .unwrap();
        let status = store.status_of("sonar").unwrap();
        assert!(status.available);
        assert_eq!(status.message.as_deref(), Some("endpoint unresolved"));

        // An explicit null removes it
        store
            .patch_status("sonar", None, serde_json::json!({ "message": null }))
            .await
            .unwrap();
        assert_eq!(store.status_of("sonar").unwrap().message, None);
    }

    #[tokio::test]
    async fn test_publish_clears_fields_that_became_unset() {
        let store = FakeStore::<SonarPermissionTemplate>::new();
        store.insert(create_test_template("tpl", "default", "sonar", &[]));
        let failed = |_: &SonarPermissionTemplate| SonarPermissionTemplateStatus {
            value: TemplateState::Failed,
            failure_count: 1,
            id: Some("AU-1".to_string()),
            error: Some("team-b: boom".to_string()),
        };
        let applied = |_: &SonarPermissionTemplate| SonarPermissionTemplateStatus {
            value: TemplateState::Applied,
            failure_count: 0,
            id: Some("AU-1".to_string()),
            error: None,
        };

        publish_status(&store, "tpl", failed).await.unwrap();
        publish_status(&store, "tpl", applied).await.unwrap();
        publish_status(&store, "tpl", applied).await.unwrap();

        let status = store.status_of("tpl").unwrap();
        assert_eq!(status.value, TemplateState::Applied);
        assert_eq!(status.error, None);
        assert_eq!(store.patch_count(), 2, "converged status must not be rewritten");
    }
}
