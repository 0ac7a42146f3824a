//! SonarPermissionTemplate Custom Resource Definition
//!
//! Declares a permission template on a managed Sonar instance: a name, a
//! project-key pattern and the group to permission bindings it grants.

use crate::status::StatusOwner;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// SonarPermissionTemplateSpec defines the desired state of a permission template
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sonar.microscaler.io",
    version = "v1alpha1",
    kind = "SonarPermissionTemplate",
    namespaced,
    status = "SonarPermissionTemplateStatus",
    printcolumn = r#"{"name":"Sonar","type":"string","jsonPath":".spec.sonarOwner"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.value"}"#,
    printcolumn = r#"{"name":"Failures","type":"integer","jsonPath":".status.failureCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SonarPermissionTemplateSpec {
    /// Name of the Sonar resource (same namespace) this template lives on
    pub sonar_owner: String,

    /// Template display name on the external service
    pub name: String,

    /// Regular expression matched against project keys
    pub project_key_pattern: String,

    /// Human description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Group to permission bindings
    #[serde(default)]
    pub group_permissions: Vec<GroupPermission>,
}

/// One group and the permissions it should hold on the template
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupPermission {
    /// Group name on the external service
    pub group_name: String,

    /// Permissions granted to the group
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Fixed permission vocabulary of a project permission template
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Administer the project
    Admin,
    /// See source code
    Codeviewer,
    /// Administer issues
    Issueadmin,
    /// Administer security hotspots
    Securityhotspotadmin,
    /// Execute analysis
    Scan,
    /// Browse the project
    User,
}

impl Permission {
    /// Every permission label, in wire order.
    pub const ALL: [Permission; 6] = [
        Permission::Admin,
        Permission::Codeviewer,
        Permission::Issueadmin,
        Permission::Securityhotspotadmin,
        Permission::Scan,
        Permission::User,
    ];

    /// Wire label understood by the external service.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::Codeviewer => "codeviewer",
            Permission::Issueadmin => "issueadmin",
            Permission::Securityhotspotadmin => "securityhotspotadmin",
            Permission::Scan => "scan",
            Permission::User => "user",
        }
    }

    /// Parses a wire label.
    pub fn from_label(label: &str) -> Option<Permission> {
        Permission::ALL.into_iter().find(|p| p.as_str() == label)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template state published in `status.value`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum TemplateState {
    /// Not reconciled yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// All bindings match the spec
    #[serde(alias = "applied")]
    Applied,

    /// Last pass failed; see `error` and `failureCount`
    #[serde(alias = "failed")]
    Failed,
}

/// SonarPermissionTemplateStatus defines the observed state of a permission template
///
/// Unset optional fields serialize as `null`, so a merge patch clears them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SonarPermissionTemplateStatus {
    /// Result of the last pass
    #[serde(default)]
    pub value: TemplateState,

    /// Consecutive failed passes; reset to zero on success
    #[serde(default)]
    pub failure_count: u32,

    /// Identifier assigned by the external service
    #[serde(default)]
    pub id: Option<String>,

    /// Error message of the last failed pass
    #[serde(default)]
    pub error: Option<String>,
}

impl SonarPermissionTemplateSpec {
    /// Desired bindings keyed by group. Duplicate group entries are merged.
    pub fn desired_bindings(&self) -> BTreeMap<String, BTreeSet<Permission>> {
        let mut bindings: BTreeMap<String, BTreeSet<Permission>> = BTreeMap::new();
        for gp in &self.group_permissions {
            bindings
                .entry(gp.group_name.clone())
                .or_default()
                .extend(gp.permissions.iter().copied());
        }
        // A group with no permissions holds nothing on the template
        bindings.retain(|_, perms| !perms.is_empty());
        bindings
    }
}

impl SonarPermissionTemplate {
    /// Stored external identifier, if one has been recorded.
    pub fn external_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Failure counter from the last published status.
    pub fn failure_count(&self) -> u32 {
        self.status.as_ref().map_or(0, |s| s.failure_count)
    }
}

impl StatusOwner for SonarPermissionTemplate {
    type Status = SonarPermissionTemplateStatus;

    fn current_status(&self) -> Option<&SonarPermissionTemplateStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<SonarPermissionTemplateStatus> {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(group: &str, perms: &[Permission]) -> GroupPermission {
        GroupPermission {
            group_name: group.to_string(),
            permissions: perms.to_vec(),
        }
    }

    #[test]
    fn test_desired_bindings_merges_duplicate_groups() {
        let spec = SonarPermissionTemplateSpec {
            sonar_owner: "sonar".to_string(),
            name: "team".to_string(),
            project_key_pattern: "team-.*".to_string(),
            description: None,
            group_permissions: vec![
                binding("team-a", &[Permission::Admin]),
                binding("team-b", &[]),
                binding("team-a", &[Permission::User, Permission::Admin]),
            ],
        };

        let bindings = spec.desired_bindings();
        assert_eq!(bindings.len(), 1, "empty groups are dropped");
        assert_eq!(
            bindings["team-a"],
            BTreeSet::from([Permission::Admin, Permission::User])
        );
    }

    #[test]
    fn test_permission_labels() {
        for p in Permission::ALL {
            assert_eq!(Permission::from_label(p.as_str()), Some(p));
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.as_str()));
        }
        assert_eq!(Permission::from_label("owner"), None);
        assert!(serde_json::from_str::<Permission>("\"owner\"").is_err());
    }

    #[test]
    fn test_external_id_ignores_empty_string() {
        let mut tpl = SonarPermissionTemplate::new(
            "tpl",
            SonarPermissionTemplateSpec {
                sonar_owner: "sonar".to_string(),
                name: "team".to_string(),
                project_key_pattern: ".*".to_string(),
                description: None,
                group_permissions: vec![],
            },
        );
        assert_eq!(tpl.external_id(), None);

        tpl.status = Some(SonarPermissionTemplateStatus {
            id: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(tpl.external_id(), None);

        tpl.status = Some(SonarPermissionTemplateStatus {
            id: Some("AU-1".to_string()),
            failure_count: 2,
            ..Default::default()
        });
        assert_eq!(tpl.external_id(), Some("AU-1"));
        assert_eq!(tpl.failure_count(), 2);
    }

    #[test]
    fn test_applied_status_carries_null_error() {
        let status = SonarPermissionTemplateStatus {
            value: TemplateState::Applied,
            failure_count: 0,
            id: Some("AU-1".to_string()),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.as_object().unwrap().contains_key("error"));
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["id"], "AU-1");
    }
}
