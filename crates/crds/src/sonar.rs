//! Sonar Custom Resource Definition
//!
//! Describes one managed code-quality service instance. The controller derives
//! every cluster-side object it provisions (config maps, secrets, CI wiring,
//! catalog entry) from this resource and publishes what it observed back into
//! `status`.

use crate::status::StatusOwner;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Port the service listens on inside the cluster
pub const SONAR_SERVICE_PORT: u16 = 9000;

/// SonarSpec defines the desired state of a Sonar instance
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sonar.microscaler.io",
    version = "v1alpha1",
    kind = "Sonar",
    namespaced,
    status = "SonarStatus",
    shortname = "sonar",
    printcolumn = r#"{"name":"Available","type":"boolean","jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.externalUrl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SonarSpec {
    /// DNS wildcard the external hostname is built from
    /// (`<name>-<namespace>.<dnsWildcard>`)
    pub dns_wildcard: String,

    /// Optional URL path prefix the service is served under (e.g. "/sonar")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,

    /// Name of a permission template to make the default for new projects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_permission_template: Option<String>,
}

/// Lifecycle phase published in `status.status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum SonarPhase {
    /// Not reconciled yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Some supporting objects could not be ensured; retried on the next pass
    #[serde(alias = "provisioning")]
    Provisioning,

    /// Endpoint resolved and at least one replica ready
    #[serde(alias = "ready")]
    Ready,

    /// Endpoint unresolved or no ready replica
    #[serde(alias = "unavailable")]
    Unavailable,

    /// Spec is malformed
    #[serde(alias = "failed")]
    Failed,
}

/// SonarStatus defines the observed state of a Sonar instance
///
/// Unset optional fields serialize as `null`, so a merge patch clears them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SonarStatus {
    /// True iff at least one replica reports ready
    #[serde(default)]
    pub available: bool,

    /// Time `available` last changed value
    #[serde(default)]
    pub last_time_updated: Option<DateTime<Utc>>,

    /// Current phase
    #[serde(default)]
    pub status: SonarPhase,

    /// Externally reachable URL, once the endpoint is resolved
    #[serde(default)]
    pub external_url: Option<String>,

    /// Human-readable detail for the current phase
    #[serde(default)]
    pub message: Option<String>,
}

impl Sonar {
    /// Normalised base path: empty, or `/segment` without a trailing slash.
    pub fn base_path(&self) -> String {
        match self.spec.base_path.as_deref().map(str::trim) {
            None | Some("") | Some("/") => String::new(),
            Some(path) => format!("/{}", path.trim_matches('/')),
        }
    }

    /// Hostname computed from the DNS wildcard.
    pub fn computed_host(&self) -> String {
        format!(
            "{}-{}.{}",
            self.name_any(),
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.spec.dns_wildcard.trim_start_matches("*.")
        )
    }

    /// In-cluster URL of the administrative API.
    pub fn service_url(&self) -> String {
        format!(
            "http://{}.{}:{}{}",
            self.name_any(),
            self.namespace().unwrap_or_else(|| "default".to_string()),
            SONAR_SERVICE_PORT,
            self.base_path()
        )
    }

    /// External URL for a resolved host.
    pub fn external_url(&self, host: &str) -> String {
        format!("https://{}{}", host, self.base_path())
    }

    /// True when the last published status says the instance is available.
    pub fn is_available(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.available)
    }

    /// Name of the secret holding administrative credentials.
    pub fn admin_secret_name(&self) -> String {
        format!("{}-admin-password", self.name_any())
    }

    /// Name of the secret holding the CI user's token.
    pub fn ci_secret_name(&self) -> String {
        format!("{}-ciuser-token", self.name_any())
    }
}

impl StatusOwner for Sonar {
    type Status = SonarStatus;

    fn current_status(&self) -> Option<&SonarStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<SonarStatus> {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn sonar(base_path: Option<&str>) -> Sonar {
        Sonar {
            metadata: ObjectMeta {
                name: Some("sonar".to_string()),
                namespace: Some("ci".to_string()),
                ..Default::default()
            },
            spec: SonarSpec {
                dns_wildcard: "apps.example.com".to_string(),
                base_path: base_path.map(str::to_string),
                default_permission_template: None,
            },
            status: None,
        }
    }

    #[test]
    fn test_base_path_normalisation() {
        assert_eq!(sonar(None).base_path(), "");
        assert_eq!(sonar(Some("/")).base_path(), "");
        assert_eq!(sonar(Some("sonar/")).base_path(), "/sonar");
        assert_eq!(sonar(Some("/sonar")).base_path(), "/sonar");
    }

    #[test]
    fn test_urls() {
        let s = sonar(Some("/sonar"));
        assert_eq!(s.computed_host(), "sonar-ci.apps.example.com");
        assert_eq!(s.service_url(), "http://sonar.ci:9000/sonar");
        assert_eq!(
            s.external_url("sonar-ci.apps.example.com"),
            "https://sonar-ci.apps.example.com/sonar"
        );
    }

    #[test]
    fn test_wildcard_prefix_is_stripped() {
        let mut s = sonar(None);
        s.spec.dns_wildcard = "*.apps.example.com".to_string();
        assert_eq!(s.computed_host(), "sonar-ci.apps.example.com");
    }

    #[test]
    fn test_phase_accepts_lowercase() {
        let phase: SonarPhase = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(phase, SonarPhase::Ready);
        assert_eq!(serde_json::to_string(&SonarPhase::Unavailable).unwrap(), "\"Unavailable\"");
    }

    #[test]
    fn test_status_serializes_unset_fields_as_null() {
        let status = SonarStatus {
            available: true,
            status: SonarPhase::Ready,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["message"], serde_json::Value::Null);
        assert_eq!(json["externalUrl"], serde_json::Value::Null);
        assert!(json.as_object().unwrap().contains_key("message"));
        assert!(json.as_object().unwrap().contains_key("lastTimeUpdated"));
    }
}
