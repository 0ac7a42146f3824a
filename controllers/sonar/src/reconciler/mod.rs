//! Reconciliation logic for the Sonar CRDs.
//!
//! - `sonar`: provisions supporting objects for a `Sonar` and publishes its availability
//! - `permission_template`: converges a `SonarPermissionTemplate` onto the Sonar API

pub mod permission_template;
pub mod sonar;


use crate::backoff::FibonacciBackoff;
use crate::clients::SonarClientProvider;
use crate::error::ControllerError;
use crate::platform::{secret_value, PlatformAdapter};
use crate::status::ResourceStore;
use crds::{Sonar, SonarPermissionTemplate};
use kube::ResourceExt;
use sonar_client::SonarClientTrait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Icon shown for the instance in the component catalog
pub const DEFAULT_CATALOG_ICON: &str = "data:image/svg+xml;base64,PHN2ZyB4bWxucz0iaHR0cDovL3d3dy53My5vcmcvMjAwMC9zdmciIHZpZXdCb3g9IjAgMCAyNCAyNCI+PHBhdGggZD0iTTMgMjFDMTMgMjEgMjEgMTMgMjEgMyIgc3Ryb2tlPSIjNEU5QkNEIiBzdHJva2Utd2lkdGg9IjIiIGZpbGw9Im5vbmUiLz48L3N2Zz4=";

/// Tunables shared by both reconcilers
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
    /// Deadline for one pass
    pub reconcile_timeout: Duration,
    /// Deadline handed to endpoint resolution
    pub endpoint_timeout: Duration,
    /// Catalog icon reference
    pub catalog_icon: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(120),
            endpoint_timeout: Duration::from_secs(30),
            catalog_icon: DEFAULT_CATALOG_ICON.to_string(),
        }
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
    generation: Option<i64>,
    retry_at: Option<Instant>,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
            generation: None,
            retry_at: None,
        }
    }
}

/// Reconciles Sonar resources.
pub struct Reconciler {
    pub(crate) platform: Arc<dyn PlatformAdapter>,
    pub(crate) clients: Arc<dyn SonarClientProvider>,
    pub(crate) sonars: Arc<dyn ResourceStore<Sonar>>,
    pub(crate) templates: Arc<dyn ResourceStore<SonarPermissionTemplate>>,
    pub(crate) settings: ReconcilerSettings,
    /// Failure tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        platform: Arc<dyn PlatformAdapter>,
        clients: Arc<dyn SonarClientProvider>,
        sonars: Arc<dyn ResourceStore<Sonar>>,
        templates: Arc<dyn ResourceStore<SonarPermissionTemplate>>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            platform,
            clients,
            sonars,
            templates,
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Client authenticated with the instance's admin secret.
    pub(crate) async fn admin_client(&self, sonar: &Sonar) -> Result<Arc<dyn SonarClientTrait>, ControllerError> {
        let namespace = sonar.namespace().unwrap_or_else(|| "default".to_string());
        let data = self
            .platform
            .read_secret(&namespace, &sonar.admin_secret_name())
            .await?;
        let login = secret_value(&data, "user")?;
        let password = secret_value(&data, "password")?;
        Ok(self.clients.client_as(sonar, &login, &password))
    }

    /// Time left before a failed resource may be retried.
    ///
    /// `None` when the resource is not backing off or its generation moved on
    /// (a spec edit always gets a fresh pass).
    pub(crate) fn backoff_remaining(&self, key: &str, generation: Option<i64>) -> Option<Duration> {
        let states = self.backoff_states.lock().ok()?;
        let state = states.get(key)?;
        if state.generation != generation {
            return None;
        }
        let retry_at = state.retry_at?;
        retry_at
            .checked_duration_since(Instant::now())
            .filter(|remaining| !remaining.is_zero())
    }

    /// Records a failed pass and returns the delay before the next attempt.
    ///
    /// With `failure_count` the delay follows that persisted counter; without
    /// it the in-memory sequence for the resource advances.
    pub(crate) fn record_failure(&self, key: &str, generation: Option<i64>, failure_count: Option<u32>) -> Duration {
        let Ok(mut states) = self.backoff_states.lock() else {
            return FibonacciBackoff::for_failure_count(failure_count.unwrap_or(1));
        };
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        let delay = match failure_count {
            Some(count) => FibonacciBackoff::for_failure_count(count),
            None => state.backoff.next_backoff(),
        };
        state.generation = generation;
        state.retry_at = Some(Instant::now() + delay);
        debug!(
            "Backing off {} for {:?} (error #{})",
            key, delay, state.error_count
        );
        delay
    }

    /// Forgets failures after a successful pass.
    pub(crate) fn reset_error(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

/// Key used for per-resource bookkeeping.
pub(crate) fn resource_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind, namespace, name)
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn guarded<T, E, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T, ControllerError>
where
    Fut: Future<Output = Result<T, E>>,
    ControllerError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ControllerError::Cancelled),
        result = fut => result.map_err(ControllerError::from),
    }
}
