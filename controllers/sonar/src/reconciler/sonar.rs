//! Sonar instance reconciliation.
//!
//! One pass resolves the external endpoint, ensures the supporting cluster
//! objects, registers the instance in the component catalog, reads replica
//! readiness and finally publishes status. Once the instance is available its
//! admin password is moved off the default and the CI user gets a token.
//! Failures while ensuring objects, registering the catalog entry or setting
//! up credentials are collected rather than aborting the pass, so status
//! always reflects the best current knowledge.

use super::{guarded, Reconciler};
use crate::error::ControllerError;
use crate::platform::{secret_value, CatalogEntry};
use crate::status::publish_status;
use chrono::{DateTime, Utc};
use crds::{Sonar, SonarPhase, SonarStatus};
use sonar_client::{CreateUserRequest, SonarError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Login of the CI user whose token is stored for pipelines
const CI_USER: &str = "ci-user";

/// Name of the token issued to the CI user
const CI_TOKEN_NAME: &str = "jenkins";

/// Kind of CI service account registered for the instance
const CI_SERVICE_ACCOUNT_KIND: &str = "token";

/// Admin password of a freshly installed instance
const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// What one pass observed, before it is folded into `SonarStatus`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Observation {
    pub available: bool,
    pub phase: SonarPhase,
    pub external_url: Option<String>,
    pub message: Option<String>,
}

/// Failures collected while the pass keeps going.
#[derive(Debug, Default)]
struct Problems(Vec<String>);

impl Problems {
    /// Keeps the value of a successful step; records a failed one.
    /// Cancellation is never swallowed.
    fn check<T>(&mut self, step: &str, result: Result<T, ControllerError>) -> Result<Option<T>, ControllerError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(ControllerError::Cancelled) => Err(ControllerError::Cancelled),
            Err(e) => {
                warn!("{} failed: {}", step, e);
                self.0.push(format!("{}: {}", step, e));
                Ok(None)
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn summary(&self) -> String {
        self.0.join("; ")
    }
}

/// Checks the spec and returns the owner reference for generated objects.
pub(crate) fn validate_sonar(sonar: &Sonar) -> Result<OwnerReference, ControllerError> {
    let wildcard = sonar.spec.dns_wildcard.trim().trim_start_matches("*.");
    if wildcard.is_empty() {
        return Err(ControllerError::InvalidConfig("dnsWildcard must not be empty".to_string()));
    }
    if wildcard.starts_with('.')
        || wildcard.ends_with('.')
        || !wildcard
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(ControllerError::InvalidConfig(format!(
            "dnsWildcard '{}' is not a valid DNS suffix",
            sonar.spec.dns_wildcard
        )));
    }
    if let Some(path) = sonar.spec.base_path.as_deref() {
        if path.chars().any(|c| c.is_whitespace() || c == '?' || c == '#') {
            return Err(ControllerError::InvalidConfig(format!(
                "basePath '{}' is not a URL path",
                path
            )));
        }
    }
    if sonar
        .spec
        .default_permission_template
        .as_deref()
        .is_some_and(|t| t.trim().is_empty())
    {
        return Err(ControllerError::InvalidConfig(
            "defaultPermissionTemplate must not be blank".to_string(),
        ));
    }
    sonar
        .controller_owner_ref(&())
        .ok_or_else(|| ControllerError::InvalidConfig("Sonar has no uid yet".to_string()))
}

/// `sonar.properties` for the instance.
pub(crate) fn render_configuration(sonar: &Sonar, host: &str) -> BTreeMap<String, String> {
    let base_path = sonar.base_path();
    let properties = format!(
        "sonar.web.context={}\nsonar.core.serverBaseURL=https://{}{}\n",
        base_path, host, base_path
    );
    BTreeMap::from([("sonar.properties".to_string(), properties)])
}

/// Groovy script registering the instance in the CI server.
pub(crate) fn render_ci_script(sonar: &Sonar) -> BTreeMap<String, String> {
    let script = format!(
        r#"import hudson.plugins.sonar.*
import hudson.plugins.sonar.model.TriggersConfig
import jenkins.model.*

def descriptor = Jenkins.getInstance().getDescriptor("hudson.plugins.sonar.SonarGlobalConfiguration")
def installation = new SonarInstallation("{name}", "{url}", "{credentials}", null, null, new TriggersConfig(), "")
descriptor.setInstallations(installation)
descriptor.save()
"#,
        name = sonar.name_any(),
        url = sonar.service_url(),
        credentials = sonar.ci_secret_name(),
    );
    BTreeMap::from([("context".to_string(), script)])
}

fn generated_secret(pairs: &[(&str, String)]) -> BTreeMap<String, Vec<u8>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
}

fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Folds an observation into the previous status.
///
/// `lastTimeUpdated` only moves when `available` flips, so a pass that
/// observes the same state yields an identical status.
pub(crate) fn next_sonar_status(current: Option<&SonarStatus>, observation: &Observation, now: DateTime<Utc>) -> SonarStatus {
    let last_time_updated = match current {
        Some(prev) if prev.available == observation.available && prev.last_time_updated.is_some() => {
            prev.last_time_updated
        }
        _ => Some(now),
    };
    SonarStatus {
        available: observation.available,
        last_time_updated,
        status: observation.phase,
        external_url: observation.external_url.clone(),
        message: observation.message.clone(),
    }
}

impl Reconciler {
    /// Reconciles a Sonar resource.
    pub async fn reconcile_sonar(&self, sonar: &Sonar, cancel: &CancellationToken) -> Result<(), ControllerError> {
        let name = sonar
            .metadata
            .name
            .as_ref()
            .ok_or_else(|| ControllerError::InvalidConfig("Sonar missing name".to_string()))?;
        let namespace = sonar.namespace().unwrap_or_else(|| "default".to_string());

        info!("Reconciling Sonar {}/{}", namespace, name);

        let owner = match validate_sonar(sonar) {
            Ok(owner) => owner,
            Err(e) => {
                error!("Sonar {}/{} is invalid: {}", namespace, name, e);
                let message = e.to_string();
                publish_status(self.sonars.as_ref(), name, |current: &Sonar| {
                    let prev = current.status.clone().unwrap_or_default();
                    SonarStatus {
                        status: SonarPhase::Failed,
                        message: Some(message.clone()),
                        ..prev
                    }
                })
                .await?;
                return Err(e);
            }
        };

        let endpoint = guarded(
            cancel,
            self.platform
                .resolve_endpoint(&namespace, name, self.settings.endpoint_timeout),
        )
        .await;
        if matches!(endpoint, Err(ControllerError::Cancelled)) {
            return Err(ControllerError::Cancelled);
        }

        // The rendered base URL follows the resolved host once there is one
        let host = match &endpoint {
            Ok(host) => host.clone(),
            Err(_) => sonar.computed_host(),
        };
        let mut problems = Problems::default();
        self.ensure_supporting_objects(sonar, &namespace, &owner, &host, cancel, &mut problems)
            .await?;

        let observation = match endpoint {
            Err(e) => {
                warn!("Endpoint for Sonar {}/{} unresolved: {}", namespace, name, e);
                let mut message = format!("endpoint unresolved: {}", e);
                if !problems.is_empty() {
                    message = format!("{}; {}", message, problems.summary());
                }
                Observation {
                    available: false,
                    phase: SonarPhase::Unavailable,
                    external_url: None,
                    message: Some(message),
                }
            }
            Ok(host) => {
                let url = sonar.external_url(&host);
                debug!("Sonar {}/{} reachable at {}", namespace, name, url);

                let entry = CatalogEntry {
                    name: name.clone(),
                    url: url.clone(),
                    icon: self.settings.catalog_icon.clone(),
                };
                problems.check(
                    "catalog entry",
                    guarded(cancel, self.platform.ensure_catalog_entry(&namespace, &entry)).await,
                )?;

                let ready = problems
                    .check(
                        "replica readiness",
                        guarded(cancel, self.platform.ready_replicas(&namespace, name)).await,
                    )?
                    .flatten();
                let available = ready.is_some_and(|n| n >= 1);

                if available {
                    let credentials = problems.check(
                        "service credentials",
                        self.ensure_service_credentials(sonar, &namespace, &owner, cancel).await,
                    )?;
                    if let (Some(()), Some(template)) =
                        (credentials, sonar.spec.default_permission_template.as_deref())
                    {
                        problems.check(
                            "default permission template",
                            self.ensure_default_template(sonar, template, cancel).await,
                        )?;
                    }
                }

                let (phase, message) = if !problems.is_empty() {
                    (SonarPhase::Provisioning, Some(problems.summary()))
                } else if available {
                    (SonarPhase::Ready, None)
                } else {
                    (
                        SonarPhase::Unavailable,
                        Some(format!("{} ready replicas", ready.unwrap_or(0))),
                    )
                };
                Observation {
                    available,
                    phase,
                    external_url: Some(url),
                    message,
                }
            }
        };

        let status = publish_status(self.sonars.as_ref(), name, |current: &Sonar| {
            next_sonar_status(current.status.as_ref(), &observation, Utc::now())
        })
        .await?;
        info!(
            "Sonar {}/{} is {:?} (available: {})",
            namespace, name, status.status, status.available
        );

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Provisioning(problems.summary()))
        }
    }

    /// Config maps, the admin secret and CI wiring. Only cancellation is
    /// returned as an error.
    async fn ensure_supporting_objects(
        &self,
        sonar: &Sonar,
        namespace: &str,
        owner: &OwnerReference,
        host: &str,
        cancel: &CancellationToken,
        problems: &mut Problems,
    ) -> Result<(), ControllerError> {
        let name = sonar.name_any();
        let platform = &self.platform;

        let config = render_configuration(sonar, host);
        problems.check(
            "configuration config map",
            guarded(
                cancel,
                platform.ensure_config_map(namespace, &format!("{}-config", name), config, owner),
            )
            .await,
        )?;

        let admin = generated_secret(&[("user", "admin".to_string()), ("password", generate_password())]);
        problems.check(
            "admin secret",
            guarded(
                cancel,
                platform.ensure_secret(namespace, &sonar.admin_secret_name(), admin, owner),
            )
            .await,
        )?;

        let ci_secret = sonar.ci_secret_name();
        let script_config = format!("{}-jenkins-plugin-config", name);
        let script_ready = problems.check(
            "CI script config map",
            guarded(
                cancel,
                platform.ensure_config_map(namespace, &script_config, render_ci_script(sonar), owner),
            )
            .await,
        )?;
        if script_ready.is_some() {
            let script = problems.check(
                "CI script",
                guarded(
                    cancel,
                    platform.ensure_ci_script(namespace, &format!("{}-jenkins-plugin", name), &script_config),
                )
                .await,
            )?;
            if let Some(target) = script {
                problems.check(
                    "CI script owner",
                    guarded(cancel, platform.set_owner(namespace, &target, owner)).await,
                )?;
            }
        }

        let account = problems.check(
            "CI service account",
            guarded(
                cancel,
                platform.ensure_ci_service_account(namespace, &ci_secret, CI_SERVICE_ACCOUNT_KIND, &ci_secret),
            )
            .await,
        )?;
        if let Some(target) = account {
            problems.check(
                "CI service account owner",
                guarded(cancel, platform.set_owner(namespace, &target, owner)).await,
            )?;
        }

        Ok(())
    }

    /// Moves the service off its default admin password and issues the CI
    /// user's token. The CI secret records that the token was issued, so an
    /// existing secret is left alone.
    async fn ensure_service_credentials(
        &self,
        sonar: &Sonar,
        namespace: &str,
        owner: &OwnerReference,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let admin = guarded(cancel, self.admin_client(sonar)).await?;
        match guarded(cancel, admin.validate_connection()).await {
            Ok(()) => {}
            Err(ControllerError::Sonar(SonarError::Authentication(reason))) => {
                debug!("Admin secret rejected by {} ({}), rotating default password", admin.base_url(), reason);
                self.rotate_admin_password(sonar, namespace, cancel).await?;
                guarded(cancel, admin.validate_connection()).await?;
            }
            Err(e) => return Err(e),
        }

        let ci_secret = sonar.ci_secret_name();
        match guarded(cancel, self.platform.read_secret(namespace, &ci_secret)).await {
            Ok(_) => return Ok(()),
            Err(ControllerError::Platform(e)) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if guarded(cancel, admin.find_user(CI_USER)).await?.is_none() {
            let request = CreateUserRequest {
                login: CI_USER.to_string(),
                name: "CI user".to_string(),
                password: generate_password(),
            };
            guarded(cancel, admin.create_user(&request)).await?;
            info!("Created user {} on {}", CI_USER, admin.base_url());
        }

        // A token issued by an interrupted pass cannot be read back
        guarded(cancel, admin.revoke_token(CI_USER, CI_TOKEN_NAME)).await?;
        let token = guarded(cancel, admin.generate_token(CI_USER, CI_TOKEN_NAME)).await?;
        let data = generated_secret(&[("username", CI_USER.to_string()), ("secret", token.token)]);
        guarded(cancel, self.platform.ensure_secret(namespace, &ci_secret, data, owner)).await?;
        info!("Stored token of {} in secret {}/{}", CI_USER, namespace, ci_secret);
        Ok(())
    }

    /// Sets the password from the admin secret, authenticating with the default one.
    async fn rotate_admin_password(&self, sonar: &Sonar, namespace: &str, cancel: &CancellationToken) -> Result<(), ControllerError> {
        let data = guarded(cancel, self.platform.read_secret(namespace, &sonar.admin_secret_name())).await?;
        let login = secret_value(&data, "user")?;
        let password = secret_value(&data, "password")?;

        let bootstrap = self.clients.client_as(sonar, &login, DEFAULT_ADMIN_PASSWORD);
        guarded(cancel, bootstrap.change_password(&login, DEFAULT_ADMIN_PASSWORD, &password)).await?;
        info!("Replaced default password of {} on {}", login, bootstrap.base_url());
        Ok(())
    }

    /// Makes the named template the default for new projects, if it is not already.
    async fn ensure_default_template(
        &self,
        sonar: &Sonar,
        template_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let client = guarded(cancel, self.admin_client(sonar)).await?;
        let template = guarded(cancel, client.find_template_by_name(template_name))
            .await?
            .ok_or_else(|| {
                ControllerError::NotFound(format!("permission template '{}'", template_name))
            })?;

        let current = guarded(cancel, client.get_default_template_id()).await?;
        if current.as_deref() == Some(template.id.as_str()) {
            debug!("'{}' is already the default permission template", template_name);
            return Ok(());
        }

        guarded(cancel, client.set_default_template(&template.id)).await?;
        info!(
            "Set '{}' ({}) as default permission template on {}",
            template_name,
            template.id,
            client.base_url()
        );
        Ok(())
    }
}
