//! Main controller implementation.
//!
//! Wires the Kubernetes client, the platform adapter and the Sonar client
//! provider into one `Reconciler`, then runs both watchers and the metrics
//! server until one of them exits or a shutdown signal arrives.

use crate::clients::HttpClientProvider;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::observability::server::{start_server, ServerState};
use crate::platform::{KubePlatform, PlatformAdapter};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{Sonar, SonarPermissionTemplate};
use kube::{Api, Client};
use sonar_client::build_http_client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Main controller for Sonar resources.
pub struct Controller {
    sonar_watcher: JoinHandle<Result<(), ControllerError>>,
    template_watcher: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), anyhow::Error>>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Sonar Controller");

        let kube_client = Client::try_default().await?;
        let http = build_http_client()?;

        let ns = config.namespace.as_str();
        let sonar_api: Api<Sonar> = Api::namespaced(kube_client.clone(), ns);
        let template_api: Api<SonarPermissionTemplate> = Api::namespaced(kube_client.clone(), ns);

        let platform: Arc<dyn PlatformAdapter> = Arc::new(KubePlatform::new(kube_client));
        let clients = Arc::new(HttpClientProvider::new(http));

        let reconciler = Arc::new(Reconciler::new(
            platform,
            clients,
            Arc::new(sonar_api.clone()),
            Arc::new(template_api.clone()),
            config.settings.clone(),
        ));

        let shutdown = CancellationToken::new();
        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            sonar_api,
            template_api,
            shutdown.clone(),
        ));

        let sonar_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_sonars().await })
        };

        let template_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_permission_templates().await })
        };

        let is_ready = Arc::new(AtomicBool::new(false));
        let server = tokio::spawn(start_server(
            config.metrics_port,
            Arc::new(ServerState {
                is_ready: is_ready.clone(),
            }),
            shutdown.clone(),
        ));
        is_ready.store(true, Ordering::Relaxed);

        Ok(Self {
            sonar_watcher,
            template_watcher,
            server,
            shutdown,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Sonar Controller running");

        let outcome = tokio::select! {
            result = &mut self.sonar_watcher => watcher_outcome("Sonar", result),
            result = &mut self.template_watcher => watcher_outcome("SonarPermissionTemplate", result),
            result = &mut self.server => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ControllerError::Watch(format!("metrics server error: {}", e))),
                Err(e) => Err(ControllerError::Watch(format!("metrics server panicked: {}", e))),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        // Cancels in-flight passes; their partial results are left for the next run
        self.shutdown.cancel();
        self.sonar_watcher.abort();
        self.template_watcher.abort();

        if let Err(e) = &outcome {
            error!("Sonar Controller stopped: {}", e);
        } else {
            info!("Sonar Controller stopped");
        }
        outcome
    }
}

fn watcher_outcome(
    kind: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", kind, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} watcher error: {}", kind, e)))?;
    Err(ControllerError::Watch(format!("{} watcher exited", kind)))
}
