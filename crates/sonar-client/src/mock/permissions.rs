//! Permission-template operations for MockSonarClient

use super::MockSonarClient;
use crate::error::SonarError;
use crate::models::*;

fn ensure_template(client: &MockSonarClient, template_id: &str) -> Result<(), SonarError> {
    if client.templates.lock().unwrap().contains_key(template_id) {
        Ok(())
    } else {
        Err(SonarError::NotFound(format!(
            "Permission template with id '{}' is not found",
            template_id
        )))
    }
}

fn check_group(client: &MockSonarClient, group_name: &str) -> Result<(), SonarError> {
    if client.failing_groups.lock().unwrap().contains(group_name) {
        return Err(SonarError::Api(format!(
            "simulated transport error for group {}",
            group_name
        )));
    }
    Ok(())
}

pub async fn find_template_by_name(client: &MockSonarClient, name: &str) -> Result<Option<PermissionTemplate>, SonarError> {
    client.check_reachable()?;
    Ok(client.template_named(name))
}

pub async fn create_template(client: &MockSonarClient, request: &CreateTemplateRequest) -> Result<PermissionTemplate, SonarError> {
    client.check_reachable()?;
    client.record(format!("create {}", request.name));

    if client.template_named(&request.name).is_some() {
        return Err(SonarError::InvalidRequest(format!(
            "A template with the name '{}' already exists (case insensitive).",
            request.name
        )));
    }

    let template = PermissionTemplate {
        id: client.next_id(),
        name: request.name.clone(),
        description: request.description.clone(),
        project_key_pattern: request.project_key_pattern.clone(),
    };
    client.add_template(template.clone());
    Ok(template)
}

pub async fn list_template_groups(client: &MockSonarClient, template_id: &str) -> Result<Vec<TemplateGroup>, SonarError> {
    client.check_reachable()?;
    ensure_template(client, template_id)?;
    Ok(client
        .bindings_for(template_id)
        .into_iter()
        .filter(|(_, perms)| !perms.is_empty())
        .map(|(name, perms)| TemplateGroup {
            id: None,
            name,
            permissions: perms.into_iter().collect(),
        })
        .collect())
}

pub async fn add_group_to_template(client: &MockSonarClient, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("add {} {}", group_name, permission));
    check_group(client, group_name)?;
    ensure_template(client, template_id)?;

    client
        .bindings
        .lock()
        .unwrap()
        .entry(template_id.to_string())
        .or_default()
        .entry(group_name.to_string())
        .or_default()
        .insert(permission.to_string());
    Ok(())
}

pub async fn remove_group_from_template(client: &MockSonarClient, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("remove {} {}", group_name, permission));
    check_group(client, group_name)?;
    ensure_template(client, template_id)?;

    let mut bindings = client.bindings.lock().unwrap();
    if let Some(groups) = bindings.get_mut(template_id) {
        if let Some(perms) = groups.get_mut(group_name) {
            perms.remove(permission);
            if perms.is_empty() {
                groups.remove(group_name);
            }
        }
    }
    Ok(())
}

pub async fn delete_template(client: &MockSonarClient, template_id: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("delete {}", template_id));
    ensure_template(client, template_id)?;

    client.templates.lock().unwrap().remove(template_id);
    client.bindings.lock().unwrap().remove(template_id);
    let mut default = client.default_template.lock().unwrap();
    if default.as_deref() == Some(template_id) {
        *default = None;
    }
    Ok(())
}

pub async fn set_default_template(client: &MockSonarClient, template_id: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("default {}", template_id));
    ensure_template(client, template_id)?;

    *client.default_template.lock().unwrap() = Some(template_id.to_string());
    Ok(())
}
