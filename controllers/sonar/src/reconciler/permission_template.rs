//! Permission template reconciliation.
//!
//! The resource is the source of truth for the template's group bindings:
//! missing bindings are granted and anything else found on the service is
//! revoked. A group whose permission set differs is rewritten as a whole
//! (revoke the old set, grant the new one). Groups are processed
//! independently, so one failing group does not stop the others and
//! already-applied changes are kept.

use super::{guarded, Reconciler};
use crate::error::ControllerError;
use crate::observability::metrics;
use crate::status::publish_status;
use crds::{
    SonarPermissionTemplate, SonarPermissionTemplateSpec, SonarPermissionTemplateStatus,
    TemplateState,
};
use kube::ResourceExt;
use sonar_client::{CreateTemplateRequest, SonarClientTrait, SonarError, TemplateGroup};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Finalizer removing the external template when the resource is deleted
pub const TEMPLATE_FINALIZER: &str = "sonar.microscaler.io/permission-template";

/// group -> permission labels
pub(crate) type BindingSet = BTreeMap<String, BTreeSet<String>>;

/// Rewrite of one group's permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupChange {
    pub group: String,
    pub revoke: BTreeSet<String>,
    pub grant: BTreeSet<String>,
}

/// Groups whose permission set differs, in group-name order.
pub(crate) fn plan_bindings(desired: &BindingSet, current: &BindingSet) -> Vec<GroupChange> {
    let empty = BTreeSet::new();
    let groups: BTreeSet<&String> = desired.keys().chain(current.keys()).collect();

    groups
        .into_iter()
        .filter_map(|group| {
            let want = desired.get(group).unwrap_or(&empty);
            let have = current.get(group).unwrap_or(&empty);
            (want != have).then(|| GroupChange {
                group: group.clone(),
                revoke: have.clone(),
                grant: want.clone(),
            })
        })
        .collect()
}

/// Bindings reported by the service, merged per group.
pub(crate) fn observed_bindings(groups: Vec<TemplateGroup>) -> BindingSet {
    let mut bindings = BindingSet::new();
    for group in groups {
        bindings
            .entry(group.name)
            .or_default()
            .extend(group.permissions);
    }
    bindings.retain(|_, perms| !perms.is_empty());
    bindings
}

fn desired_labels(spec: &SonarPermissionTemplateSpec) -> BindingSet {
    spec.desired_bindings()
        .into_iter()
        .map(|(group, perms)| {
            (
                group,
                perms.into_iter().map(|p| p.as_str().to_string()).collect(),
            )
        })
        .collect()
}

pub(crate) fn validate_template(spec: &SonarPermissionTemplateSpec) -> Result<(), ControllerError> {
    if spec.sonar_owner.trim().is_empty() {
        return Err(ControllerError::InvalidConfig("sonarOwner must not be empty".to_string()));
    }
    if spec.name.trim().is_empty() {
        return Err(ControllerError::InvalidConfig("name must not be empty".to_string()));
    }
    if spec.project_key_pattern.trim().is_empty() {
        return Err(ControllerError::InvalidConfig(
            "projectKeyPattern must not be empty".to_string(),
        ));
    }
    if let Some(gp) = spec
        .group_permissions
        .iter()
        .find(|gp| gp.group_name.trim().is_empty())
    {
        return Err(ControllerError::InvalidConfig(format!(
            "groupPermissions entry with permissions {:?} has an empty groupName",
            gp.permissions
        )));
    }
    Ok(())
}

/// Status after a pass, computed against the freshly read resource.
pub(crate) fn next_template_status(
    current: Option<&SonarPermissionTemplateStatus>,
    template_id: Option<&str>,
    error: Option<&str>,
) -> SonarPermissionTemplateStatus {
    // A stored id always wins over one found in this pass
    let id = current
        .and_then(|s| s.id.clone())
        .filter(|id| !id.is_empty())
        .or_else(|| template_id.map(str::to_string));

    match error {
        None => SonarPermissionTemplateStatus {
            value: TemplateState::Applied,
            failure_count: 0,
            id,
            error: None,
        },
        Some(message) => SonarPermissionTemplateStatus {
            value: TemplateState::Failed,
            failure_count: current.map_or(0, |s| s.failure_count).saturating_add(1),
            id,
            error: Some(message.to_string()),
        },
    }
}

impl Reconciler {
    /// Reconciles a SonarPermissionTemplate resource.
    pub async fn reconcile_permission_template(
        &self,
        template: &SonarPermissionTemplate,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let name = template.metadata.name.as_ref().ok_or_else(|| {
            ControllerError::InvalidConfig("SonarPermissionTemplate missing name".to_string())
        })?;
        let namespace = template.namespace().unwrap_or_else(|| "default".to_string());

        info!("Reconciling SonarPermissionTemplate {}/{}", namespace, name);

        if let Err(e) = validate_template(&template.spec) {
            error!("SonarPermissionTemplate {}/{} is invalid: {}", namespace, name, e);
            self.publish_template_outcome(name, None, Some(&e)).await?;
            return Err(e);
        }

        let mut template_id = template.external_id().map(str::to_string);
        let result = self
            .converge_template(template, &mut template_id, cancel)
            .await;

        if matches!(result, Err(ControllerError::Cancelled)) {
            warn!(
                "SonarPermissionTemplate {}/{} pass cancelled, status left untouched",
                namespace, name
            );
            return Err(ControllerError::Cancelled);
        }

        let published = self
            .publish_template_outcome(name, template_id.as_deref(), result.as_ref().err())
            .await;

        match (result, published) {
            (Ok(changed), Ok(status)) => {
                info!(
                    "SonarPermissionTemplate {}/{} applied ({} group(s) changed, id {})",
                    namespace,
                    name,
                    changed,
                    status.id.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            (Ok(_), Err(publish_err)) => Err(publish_err),
            (Err(e), Ok(status)) => {
                warn!(
                    "SonarPermissionTemplate {}/{} failed ({} consecutive): {}",
                    namespace, name, status.failure_count, e
                );
                Err(e)
            }
            (Err(e), Err(publish_err)) => {
                error!(
                    "Failed to publish status for SonarPermissionTemplate {}/{}: {}",
                    namespace, name, publish_err
                );
                Err(e)
            }
        }
    }

    /// Removes the external template. Best-effort: only cancellation is an error.
    pub async fn cleanup_permission_template(
        &self,
        template: &SonarPermissionTemplate,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let name = template.name_any();
        let Some(id) = template.external_id() else {
            debug!("SonarPermissionTemplate {} has no external template to remove", name);
            return Ok(());
        };

        let sonar = match self.sonars.fetch(&template.spec.sonar_owner).await {
            Ok(sonar) => sonar,
            Err(e) => {
                warn!(
                    "Cannot remove template {} of {}: Sonar {} unreachable: {}",
                    id, name, template.spec.sonar_owner, e
                );
                return Ok(());
            }
        };

        let client = match guarded(cancel, self.admin_client(&sonar)).await {
            Ok(client) => client,
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(e) => {
                warn!("Cannot remove template {} of {}: {}", id, name, e);
                return Ok(());
            }
        };

        match guarded(cancel, client.delete_template(id)).await {
            Ok(()) => info!("Deleted permission template {} ({}) from {}", id, name, client.base_url()),
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(ControllerError::Sonar(e)) if e.is_not_found() => {
                debug!("Permission template {} already gone", id);
            }
            Err(e) => warn!("Failed to delete permission template {} ({}): {}", id, name, e),
        }
        Ok(())
    }

    /// Resolves the template and applies the binding diff. Returns the number
    /// of groups changed. `template_id` is filled in as soon as it is known.
    async fn converge_template(
        &self,
        template: &SonarPermissionTemplate,
        template_id: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, ControllerError> {
        let spec = &template.spec;
        let sonar = match self.sonars.fetch(&spec.sonar_owner).await {
            Ok(sonar) => sonar,
            Err(ControllerError::NotFound(_)) => {
                return Err(ControllerError::SonarUnavailable(format!(
                    "Sonar {} not found",
                    spec.sonar_owner
                )));
            }
            Err(e) => return Err(e),
        };
        if !sonar.is_available() {
            return Err(ControllerError::SonarUnavailable(format!(
                "Sonar {} is not available yet",
                spec.sonar_owner
            )));
        }

        let client = guarded(cancel, self.admin_client(&sonar)).await?;

        let id = match template_id.clone() {
            Some(id) => id,
            None => {
                let id = resolve_template_id(client.as_ref(), spec, cancel).await?;
                *template_id = Some(id.clone());
                id
            }
        };

        apply_bindings(client.as_ref(), &id, spec, cancel).await
    }

    async fn publish_template_outcome(
        &self,
        name: &str,
        template_id: Option<&str>,
        error: Option<&ControllerError>,
    ) -> Result<SonarPermissionTemplateStatus, ControllerError> {
        let message = error.map(ToString::to_string);
        publish_status(self.templates.as_ref(), name, |current: &SonarPermissionTemplate| {
            next_template_status(current.status.as_ref(), template_id, message.as_deref())
        })
        .await
    }
}

/// Finds the template by name or creates it.
async fn resolve_template_id(
    client: &dyn SonarClientTrait,
    spec: &SonarPermissionTemplateSpec,
    cancel: &CancellationToken,
) -> Result<String, ControllerError> {
    if let Some(existing) = guarded(cancel, client.find_template_by_name(&spec.name)).await? {
        info!("Adopting existing permission template '{}' ({})", spec.name, existing.id);
        return Ok(existing.id);
    }

    let request = CreateTemplateRequest {
        name: spec.name.clone(),
        description: spec.description.clone(),
        project_key_pattern: Some(spec.project_key_pattern.clone()),
    };
    let created = guarded(cancel, client.create_template(&request)).await?;
    if created.id.is_empty() {
        return Err(SonarError::Api(format!(
            "service returned an empty id for template '{}'",
            spec.name
        ))
        .into());
    }
    info!("Created permission template '{}' ({})", spec.name, created.id);
    Ok(created.id)
}

async fn apply_bindings(
    client: &dyn SonarClientTrait,
    template_id: &str,
    spec: &SonarPermissionTemplateSpec,
    cancel: &CancellationToken,
) -> Result<usize, ControllerError> {
    let groups = match guarded(cancel, client.list_template_groups(template_id)).await {
        Ok(groups) => groups,
        Err(ControllerError::Sonar(e)) if e.is_not_found() => {
            return Err(ControllerError::NotFound(format!(
                "permission template {} no longer exists on {}",
                template_id,
                client.base_url()
            )));
        }
        Err(e) => return Err(e),
    };

    let plan = plan_bindings(&desired_labels(spec), &observed_bindings(groups));
    if plan.is_empty() {
        debug!("Permission template {} bindings already up to date", template_id);
        return Ok(0);
    }

    let total = plan.len();
    let mut failures = Vec::new();
    for change in &plan {
        match apply_group_change(client, template_id, change, cancel).await {
            Ok(()) => debug!(
                "Group {} on template {}: revoked {:?}, granted {:?}",
                change.group, template_id, change.revoke, change.grant
            ),
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(e) => {
                warn!("Group {} on template {} failed: {}", change.group, template_id, e);
                failures.push(format!("{}: {}", change.group, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(total)
    } else {
        Err(ControllerError::PartialApply {
            failed: failures.len(),
            total,
            details: failures.join("; "),
        })
    }
}

/// Revokes the group's full prior set, then grants the full new set.
async fn apply_group_change(
    client: &dyn SonarClientTrait,
    template_id: &str,
    change: &GroupChange,
    cancel: &CancellationToken,
) -> Result<(), ControllerError> {
    for permission in &change.revoke {
        guarded(
            cancel,
            client.remove_group_from_template(template_id, &change.group, permission),
        )
        .await?;
        metrics::record_permission_change("revoke");
    }
    for permission in &change.grant {
        guarded(
            cancel,
            client.add_group_to_template(template_id, &change.group, permission),
        )
        .await?;
        metrics::record_permission_change("grant");
    }
    Ok(())
}
