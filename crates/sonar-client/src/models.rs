//! Sonar API data models
//!
//! Request and response types for the permission-template, user and token
//! endpoints.

use serde::{Deserialize, Serialize};

/// Qualifier of the default template applied to projects
pub const PROJECT_QUALIFIER: &str = "TRK";

/// Permission template as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key_pattern: Option<String>,
}

/// Default template for one qualifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultTemplate {
    pub template_id: String,
    pub qualifier: String,
}

/// Response of `api/permissions/search_templates`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchTemplatesResponse {
    #[serde(default)]
    pub permission_templates: Vec<PermissionTemplate>,
    #[serde(default)]
    pub default_templates: Vec<DefaultTemplate>,
}

/// Response of `api/permissions/create_template`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateResponse {
    pub permission_template: PermissionTemplate,
}

/// Request for creating a permission template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key_pattern: Option<String>,
}

/// A group and the permissions it holds on a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Paging block of list responses
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page_index: u32,
    pub page_size: u32,
    pub total: u32,
}

/// Response of `api/permissions/template_groups`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateGroupsResponse {
    #[serde(default)]
    pub paging: Paging,
    #[serde(default)]
    pub groups: Vec<TemplateGroup>,
}

/// A local user account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Response of `api/users/search`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchUsersResponse {
    #[serde(default)]
    pub users: Vec<User>,
}

/// Request for creating a local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub login: String,
    pub name: String,
    pub password: String,
}

/// Response of `api/users/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user: User,
}

/// Token issued by `api/user_tokens/generate`
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserToken {
    pub login: String,
    pub name: String,
    pub token: String,
}

impl std::fmt::Debug for UserToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserToken")
            .field("login", &self.login)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Response of `api/system/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Error body returned by the API on 4xx
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ErrorMessage>,
}

/// One message of an `ErrorResponse`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub msg: String,
}

impl ErrorResponse {
    /// Joins the messages, or returns the raw body when it did not parse.
    pub fn describe(body: &str) -> String {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed
                .errors
                .iter()
                .map(|e| e.msg.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            _ => body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_templates_response_parses() {
        let body = r#"{
            "permissionTemplates": [
                {"id": "AU-1", "name": "team", "projectKeyPattern": "team-.*", "createdAt": "2024-01-01"}
            ],
            "defaultTemplates": [{"templateId": "default_template", "qualifier": "TRK"}],
            "permissions": []
        }"#;
        let parsed: SearchTemplatesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.permission_templates[0].id, "AU-1");
        assert_eq!(parsed.permission_templates[0].description, None);
        assert_eq!(parsed.default_templates[0].qualifier, PROJECT_QUALIFIER);
    }

    #[test]
    fn test_error_response_describe() {
        let body = r#"{"errors":[{"msg":"A template with the name 'x' already exists"}]}"#;
        assert_eq!(
            ErrorResponse::describe(body),
            "A template with the name 'x' already exists"
        );
        assert_eq!(ErrorResponse::describe("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_token_response_parses_and_debug_hides_token() {
        let body = r#"{"login": "ci-user", "name": "jenkins", "token": "squ_123", "createdAt": "2024-01-01"}"#;
        let token: UserToken = serde_json::from_str(body).unwrap();
        assert_eq!(token.token, "squ_123");
        assert!(!format!("{:?}", token).contains("squ_123"));
    }
}
