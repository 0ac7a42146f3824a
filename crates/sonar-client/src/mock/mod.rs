//! Mock SonarClient for unit testing
//!
//! This module provides a mock implementation of SonarClientTrait that can be used
//! in unit tests without requiring a running Sonar instance.
//!
//! Operations live in `permissions.rs` and `users.rs`; this module holds the
//! in-memory state, the setup helpers and the failure switches.
//!
//! Clones share state. Each clone carries its own credentials, which are
//! checked on every call once `require_authentication` is switched on.

mod permissions;
mod users;

use crate::error::SonarError;
use crate::models::*;
use crate::sonar_trait::SonarClientTrait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Group bindings of one template: group name -> permission labels
pub type Bindings = BTreeMap<String, BTreeSet<String>>;

/// A user account held by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Account {
    pub(crate) name: String,
    pub(crate) password: String,
}

/// Mock SonarClient for testing
///
/// Templates and bindings are kept in memory. Every mutating call is counted
/// and appended to a call log so tests can assert on what a reconcile did.
#[derive(Clone)]
pub struct MockSonarClient {
    pub(crate) base_url: String,
    pub(crate) templates: Arc<Mutex<HashMap<String, PermissionTemplate>>>,
    pub(crate) bindings: Arc<Mutex<HashMap<String, Bindings>>>,
    pub(crate) default_template: Arc<Mutex<Option<String>>>,
    pub(crate) failing_groups: Arc<Mutex<HashSet<String>>>,
    pub(crate) unreachable: Arc<AtomicBool>,
    pub(crate) mutating_calls: Arc<AtomicUsize>,
    pub(crate) call_log: Arc<Mutex<Vec<String>>>,
    pub(crate) accounts: Arc<Mutex<HashMap<String, Account>>>,
    // (login, token name) -> token
    pub(crate) tokens: Arc<Mutex<HashMap<(String, String), String>>>,
    pub(crate) enforce_auth: Arc<AtomicBool>,
    pub(crate) credentials: Option<(String, String)>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockSonarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSonarClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MockSonarClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            templates: Arc::new(Mutex::new(HashMap::new())),
            bindings: Arc::new(Mutex::new(HashMap::new())),
            default_template: Arc::new(Mutex::new(None)),
            failing_groups: Arc::new(Mutex::new(HashSet::new())),
            unreachable: Arc::new(AtomicBool::new(false)),
            mutating_calls: Arc::new(AtomicUsize::new(0)),
            call_log: Arc::new(Mutex::new(Vec::new())),
            accounts: Arc::new(Mutex::new(HashMap::new())),
            tokens: Arc::new(Mutex::new(HashMap::new())),
            enforce_auth: Arc::new(AtomicBool::new(false)),
            credentials: None,
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// A handle on the same instance that authenticates as `login`
    pub fn with_credentials(&self, login: &str, password: &str) -> Self {
        Self {
            credentials: Some((login.to_string(), password.to_string())),
            ..self.clone()
        }
    }

    /// Reject calls whose credentials do not match an account
    pub fn require_authentication(&self, required: bool) {
        self.enforce_auth.store(required, Ordering::SeqCst);
    }

    /// Add a user account (for test setup, not counted)
    pub fn add_user(&self, login: &str, password: &str) {
        self.accounts.lock().unwrap().insert(
            login.to_string(),
            Account {
                name: login.to_string(),
                password: password.to_string(),
            },
        );
    }

    /// Current password of an account
    pub fn password_of(&self, login: &str) -> Option<String> {
        self.accounts
            .lock()
            .unwrap()
            .get(login)
            .map(|a| a.password.clone())
    }

    /// Token issued to `login` under `name`
    pub fn token_of(&self, login: &str, name: &str) -> Option<String> {
        self.tokens
            .lock()
            .unwrap()
            .get(&(login.to_string(), name.to_string()))
            .cloned()
    }

    /// Add a template to the mock store (for test setup, not counted)
    pub fn add_template(&self, template: PermissionTemplate) {
        self.bindings
            .lock()
            .unwrap()
            .entry(template.id.clone())
            .or_default();
        self.templates
            .lock()
            .unwrap()
            .insert(template.id.clone(), template);
    }

    /// Grant a permission directly (for test setup, not counted)
    pub fn seed_binding(&self, template_id: &str, group_name: &str, permission: &str) {
        self.bindings
            .lock()
            .unwrap()
            .entry(template_id.to_string())
            .or_default()
            .entry(group_name.to_string())
            .or_default()
            .insert(permission.to_string());
    }

    /// Make every grant and revoke for `group_name` fail with a transport-like error
    pub fn fail_group(&self, group_name: &str) {
        self.failing_groups
            .lock()
            .unwrap()
            .insert(group_name.to_string());
    }

    /// Make every call fail as if the instance could not be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.failing_groups.lock().unwrap().clear();
        self.unreachable.store(false, Ordering::SeqCst);
    }

    /// Bindings currently stored for a template
    pub fn bindings_for(&self, template_id: &str) -> Bindings {
        self.bindings
            .lock()
            .unwrap()
            .get(template_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Template stored under `name`
    pub fn template_named(&self, name: &str) -> Option<PermissionTemplate> {
        self.templates
            .lock()
            .unwrap()
            .values()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Number of stored templates
    pub fn template_count(&self) -> usize {
        self.templates.lock().unwrap().len()
    }

    /// Current default project template
    pub fn default_template(&self) -> Option<String> {
        self.default_template.lock().unwrap().clone()
    }

    /// Number of mutating calls made so far (failed ones included)
    pub fn mutating_call_count(&self) -> usize {
        self.mutating_calls.load(Ordering::SeqCst)
    }

    /// Ordered log of mutating calls, e.g. `add team-a admin`
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    /// Forget counted calls (bindings are kept)
    pub fn reset_calls(&self) {
        self.mutating_calls.store(0, Ordering::SeqCst);
        self.call_log.lock().unwrap().clear();
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> String {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        format!("AXmock{:04}", current)
    }

    pub(crate) fn record(&self, entry: String) {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(entry);
    }

    /// Fails when the instance is unreachable or the credentials are rejected.
    pub(crate) fn check_reachable(&self) -> Result<(), SonarError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SonarError::Api(format!(
                "connection refused: {}",
                self.base_url
            )));
        }
        if !self.enforce_auth.load(Ordering::SeqCst) {
            return Ok(());
        }
        let accepted = self.credentials.as_ref().is_some_and(|(login, password)| {
            self.password_of(login).as_deref() == Some(password.as_str())
        });
        if accepted {
            Ok(())
        } else {
            Err(SonarError::Authentication(format!(
                "401 Unauthorized for {:?}",
                self.credentials.as_ref().map(|(login, _)| login)
            )))
        }
    }
}

#[async_trait::async_trait]
impl SonarClientTrait for MockSonarClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<(), SonarError> {
        self.check_reachable()
    }

    async fn find_template_by_name(&self, name: &str) -> Result<Option<PermissionTemplate>, SonarError> {
        permissions::find_template_by_name(self, name).await
    }

    async fn create_template(&self, request: &CreateTemplateRequest) -> Result<PermissionTemplate, SonarError> {
        permissions::create_template(self, request).await
    }

    async fn list_template_groups(&self, template_id: &str) -> Result<Vec<TemplateGroup>, SonarError> {
        permissions::list_template_groups(self, template_id).await
    }

    async fn add_group_to_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
        permissions::add_group_to_template(self, template_id, group_name, permission).await
    }

    async fn remove_group_from_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
        permissions::remove_group_from_template(self, template_id, group_name, permission).await
    }

    async fn delete_template(&self, template_id: &str) -> Result<(), SonarError> {
        permissions::delete_template(self, template_id).await
    }

    async fn get_default_template_id(&self) -> Result<Option<String>, SonarError> {
        self.check_reachable()?;
        Ok(self.default_template())
    }

    async fn set_default_template(&self, template_id: &str) -> Result<(), SonarError> {
        permissions::set_default_template(self, template_id).await
    }

    async fn change_password(&self, login: &str, previous_password: &str, password: &str) -> Result<(), SonarError> {
        users::change_password(self, login, previous_password, password).await
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>, SonarError> {
        users::find_user(self, login).await
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, SonarError> {
        users::create_user(self, request).await
    }

    async fn generate_token(&self, login: &str, name: &str) -> Result<UserToken, SonarError> {
        users::generate_token(self, login, name).await
    }

    async fn revoke_token(&self, login: &str, name: &str) -> Result<(), SonarError> {
        users::revoke_token(self, login, name).await
    }
}
