//! Kubernetes resource watchers.
//!
//! Both CRDs run through the generic `watch_resource()` helper built on
//! `kube_runtime::Controller`, which handles reconnection and requeues.
//!
//! Each pass gets its own cancellation token, a child of the shutdown token
//! that also fires when the pass deadline expires. A resource whose last pass
//! failed is held back until its backoff elapses, unless its generation
//! moved on, so status writes and watch events for an unchanged spec cannot
//! hot-loop a failing resource.

use crate::error::ControllerError;
use crate::observability::metrics;
use crate::reconciler::permission_template::TEMPLATE_FINALIZER;
use crate::reconciler::{resource_key, Reconciler};
use crds::{Sonar, SonarPermissionTemplate};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type PassFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn object_key<K: Resource>(kind: &str, obj: &K) -> String {
    resource_key(kind, &obj.namespace().unwrap_or_default(), &obj.name_any())
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// `reconcile_fn` runs one pass; `failure_count` returns the persisted
/// failure counter after a failed pass, for kinds that keep one.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
    kind: &'static str,
    reconcile_fn: F,
    failure_count: fn(&K) -> Option<u32>,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>, CancellationToken) -> PassFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(kind, obj.as_ref());
        if error.is_validation() {
            warn!("{} is invalid, waiting for a spec change: {}", key, error);
            return Action::requeue(ctx.settings.resync_interval);
        }
        let delay = ctx.record_failure(&key, obj.meta().generation, failure_count(obj.as_ref()));
        error!("Reconciliation failed for {}: {} (retry in {:?})", key, error, delay);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let shutdown = shutdown.clone();
        async move {
            let key = object_key(kind, obj.as_ref());
            if obj.meta().deletion_timestamp.is_none() {
                if let Some(remaining) = ctx.backoff_remaining(&key, obj.meta().generation) {
                    debug!("{} is backing off for another {:?}", key, remaining);
                    return Ok(Action::requeue(remaining));
                }
            }

            debug!("Reconciling {}", key);
            metrics::increment_reconciliations(kind);
            let started = Instant::now();

            let cancel = shutdown.child_token();
            let deadline = {
                let cancel = cancel.clone();
                let timeout = ctx.settings.reconcile_timeout;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(timeout) => {
                            warn!("Pass exceeded {:?}, cancelling", timeout);
                            cancel.cancel();
                        }
                        _ = cancel.cancelled() => {}
                    }
                })
            };

            let result = reconcile_fn(ctx.clone(), obj, cancel.clone()).await;
            cancel.cancel();
            let _ = deadline.await;

            metrics::observe_reconciliation_duration(kind, started.elapsed().as_secs_f64());
            match result {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) => {
                    metrics::increment_reconciliation_errors(kind);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches bursts of events; concurrency caps parallel passes per kind
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                Err(e) => debug!("Controller event for {}: {}", kind, e),
            }
        })
        .await;

    Ok(())
}

fn unwrap_finalizer_error(err: FinalizerError<ControllerError>) -> ControllerError {
    match err {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        other => ControllerError::Finalizer(other.to_string()),
    }
}

async fn apply_template(
    reconciler: &Reconciler,
    template: &SonarPermissionTemplate,
    cancel: &CancellationToken,
) -> Result<Action, ControllerError> {
    reconciler.reconcile_permission_template(template, cancel).await?;
    Ok(Action::requeue(reconciler.settings.resync_interval))
}

async fn cleanup_template(
    reconciler: &Reconciler,
    template: &SonarPermissionTemplate,
    cancel: &CancellationToken,
) -> Result<Action, ControllerError> {
    reconciler.cleanup_permission_template(template, cancel).await?;
    Ok(Action::await_change())
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    sonar_api: Api<Sonar>,
    template_api: Api<SonarPermissionTemplate>,
    shutdown: CancellationToken,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        sonar_api: Api<Sonar>,
        template_api: Api<SonarPermissionTemplate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            sonar_api,
            template_api,
            shutdown,
        }
    }

    /// Watches Sonar resources.
    pub async fn watch_sonars(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.sonar_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.shutdown.clone(),
            "Sonar",
            |reconciler, sonar, cancel| {
                Box::pin(async move {
                    reconciler.reconcile_sonar(&sonar, &cancel).await?;
                    Ok(Action::requeue(reconciler.settings.resync_interval))
                })
            },
            |_| None,
        )
        .await
    }

    /// Watches SonarPermissionTemplate resources.
    ///
    /// Templates are also re-queued when their owning Sonar changes, so a
    /// template waiting for its instance proceeds once it becomes available.
    pub async fn watch_permission_templates(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.template_api.clone(), watcher::Config::default());
        let store = controller.store();
        let controller = controller.watches(
            self.sonar_api.clone(),
            watcher::Config::default(),
            move |sonar: Sonar| {
                let namespace = sonar.namespace();
                let name = sonar.name_any();
                store
                    .state()
                    .into_iter()
                    .filter(|template| {
                        template.namespace() == namespace && template.spec.sonar_owner == name
                    })
                    .map(|template| ObjectRef::from_obj(template.as_ref()))
                    .collect::<Vec<_>>()
            },
        );

        let api = self.template_api.clone();
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.shutdown.clone(),
            "SonarPermissionTemplate",
            move |reconciler, template, cancel| {
                let api = api.clone();
                Box::pin(async move {
                    finalizer(&api, TEMPLATE_FINALIZER, template, |event| async {
                        match event {
                            FinalizerEvent::Apply(t) => apply_template(&reconciler, &t, &cancel).await,
                            FinalizerEvent::Cleanup(t) => cleanup_template(&reconciler, &t, &cancel).await,
                        }
                    })
                    .await
                    .map_err(unwrap_finalizer_error)
                })
            },
            |template| Some(template.failure_count().saturating_add(1)),
        )
        .await
    }
}
