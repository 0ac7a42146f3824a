//! In-memory platform adapter for reconciler tests.

use super::{ApplyOutcome, CatalogEntry, ObjectTarget, PlatformAdapter, PlatformError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    config_maps: HashMap<Key, BTreeMap<String, String>>,
    secrets: HashMap<Key, BTreeMap<String, Vec<u8>>>,
    objects: HashSet<(String, ObjectTarget)>,
    owners: HashMap<(String, ObjectTarget), Vec<String>>,
    catalog: HashMap<Key, CatalogEntry>,
    endpoints: HashMap<Key, String>,
    replicas: HashMap<Key, i32>,
    failing_config_maps: bool,
    failing_catalog: bool,
}

/// Platform adapter backed by hash maps.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<State>,
    writes: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_endpoint(&self, namespace: &str, name: &str, host: &str) {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .insert(key(namespace, name), host.to_string());
    }

    pub fn clear_endpoint(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .remove(&key(namespace, name));
    }

    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: Option<i32>) {
        let mut state = self.state.lock().unwrap();
        match ready {
            Some(n) => state.replicas.insert(key(namespace, name), n),
            None => state.replicas.remove(&key(namespace, name)),
        };
    }

    pub fn seed_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        self.state.lock().unwrap().secrets.insert(
            key(namespace, name),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
    }

    pub fn fail_config_maps(&self, fail: bool) {
        self.state.lock().unwrap().failing_config_maps = fail;
    }

    pub fn fail_catalog(&self, fail: bool) {
        self.state.lock().unwrap().failing_catalog = fail;
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn catalog_entry(&self, namespace: &str, name: &str) -> Option<CatalogEntry> {
        self.state
            .lock()
            .unwrap()
            .catalog
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn has_object(&self, namespace: &str, kind: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .any(|(ns, t)| ns == namespace && t.kind == kind && t.name == name)
    }

    /// Owner uids recorded on a generated object
    pub fn owners_of(&self, namespace: &str, kind: &str, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .owners
            .iter()
            .find(|((ns, t), _)| ns == namespace && t.kind == kind && t.name == name)
            .map(|(_, uids)| uids.clone())
            .unwrap_or_default()
    }

    /// Number of create/update calls that changed something
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn refused(what: &str) -> PlatformError {
    PlatformError::MissingData(format!("simulated API failure for {}", what))
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    async fn ensure_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        _owner: &OwnerReference,
    ) -> Result<ApplyOutcome, PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_config_maps {
            return Err(refused(name));
        }
        let outcome = match state.config_maps.get(&key(namespace, name)) {
            None => ApplyOutcome::Created,
            Some(existing) if *existing == data => return Ok(ApplyOutcome::Unchanged),
            Some(_) => ApplyOutcome::Updated,
        };
        state.config_maps.insert(key(namespace, name), data);
        self.wrote();
        Ok(outcome)
    }

    async fn ensure_ci_script(&self, namespace: &str, name: &str, _config_map: &str) -> Result<ObjectTarget, PlatformError> {
        let target = ObjectTarget {
            api_version: "v2.edp.epam.com/v1".to_string(),
            kind: "JenkinsScript".to_string(),
            name: name.to_string(),
        };
        if self
            .state
            .lock()
            .unwrap()
            .objects
            .insert((namespace.to_string(), target.clone()))
        {
            self.wrote();
        }
        Ok(target)
    }

    async fn ensure_ci_service_account(
        &self,
        namespace: &str,
        name: &str,
        _kind: &str,
        _credentials_secret: &str,
    ) -> Result<ObjectTarget, PlatformError> {
        let target = ObjectTarget {
            api_version: "v2.edp.epam.com/v1".to_string(),
            kind: "JenkinsServiceAccount".to_string(),
            name: name.to_string(),
        };
        if self
            .state
            .lock()
            .unwrap()
            .objects
            .insert((namespace.to_string(), target.clone()))
        {
            self.wrote();
        }
        Ok(target)
    }

    async fn ensure_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        _owner: &OwnerReference,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.secrets.get(&key(namespace, name)) {
            return Ok(existing.clone());
        }
        state.secrets.insert(key(namespace, name), data.clone());
        self.wrote();
        Ok(data)
    }

    async fn resolve_endpoint(&self, namespace: &str, name: &str, _timeout: Duration) -> Result<String, PlatformError> {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| PlatformError::EndpointUnresolved(format!("no ingress for {}/{}", namespace, name)))
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        self.secret(namespace, name)
            .ok_or_else(|| PlatformError::NotFound(format!("secret {}/{}", namespace, name)))
    }

    async fn set_owner(&self, namespace: &str, target: &ObjectTarget, owner: &OwnerReference) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        let uids = state
            .owners
            .entry((namespace.to_string(), target.clone()))
            .or_default();
        if !uids.contains(&owner.uid) {
            uids.push(owner.uid.clone());
            self.wrote();
        }
        Ok(())
    }

    async fn ensure_catalog_entry(&self, namespace: &str, entry: &CatalogEntry) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_catalog {
            return Err(refused(&entry.name));
        }
        if !state.catalog.contains_key(&key(namespace, &entry.name)) {
            state.catalog.insert(key(namespace, &entry.name), entry.clone());
            self.wrote();
        }
        Ok(())
    }

    async fn ready_replicas(&self, namespace: &str, name: &str) -> Result<Option<i32>, PlatformError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .replicas
            .get(&key(namespace, name))
            .copied())
    }
}
