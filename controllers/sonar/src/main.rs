//! Sonar Controller
//!
//! Kubernetes operator for SonarQube instances:
//! - Sonar: provisions supporting objects and reports availability
//! - SonarPermissionTemplate: keeps a permission template and its group
//!   bindings on the instance in line with the resource

mod backoff;
mod clients;
mod config;
mod controller;
mod error;
mod observability;
mod platform;
mod reconciler;
mod status;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonar_controller=info,kube=warn".into()),
        )
        .init();

    // Must happen before any TLS client is built
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Sonar Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Resync interval: {:?}", config.settings.resync_interval);
    info!("  Reconcile timeout: {:?}", config.settings.reconcile_timeout);
    info!("  Metrics port: {}", config.metrics_port);

    if let Err(e) = observability::metrics::register_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
