//! Sonar API client
//!
//! Implements the parts of the Sonar web API the operator drives:
//! `/api/permissions/*`, `/api/users/*`, `/api/user_tokens/*` and
//! `/api/system/status`.

use crate::common::HttpClient;
use crate::error::SonarError;
use crate::models::*;
use crate::sonar_trait::SonarClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Page size used for list endpoints
const PAGE_SIZE: u32 = 100;

/// Builds the shared HTTP client (one connection pool for every instance).
pub fn build_http_client() -> Result<Client, SonarError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(SonarError::Http)
}

/// Sonar API client
#[derive(Debug, Clone)]
pub struct SonarClient {
    http: HttpClient,
}

impl SonarClient {
    /// Create a new Sonar client with its own connection pool
    ///
    /// # Arguments
    /// * `base_url` - Sonar base URL including any context path (e.g., "http://sonar:9000")
    /// * `username` - Administrative user
    /// * `password` - Password or token of that user
    pub fn new(base_url: String, username: String, password: String) -> Result<Self, SonarError> {
        Ok(Self::with_http_client(build_http_client()?, base_url, username, password))
    }

    /// Create a client on top of an existing `reqwest::Client`
    pub fn with_http_client(client: Client, base_url: String, username: String, password: String) -> Self {
        Self {
            http: HttpClient::new(client, base_url, username, password),
        }
    }

    async fn search_templates(&self, query: &str) -> Result<SearchTemplatesResponse, SonarError> {
        if query.is_empty() {
            self.http.get("/api/permissions/search_templates", &[]).await
        } else {
            self.http
                .get("/api/permissions/search_templates", &[("q", query)])
                .await
        }
    }
}

#[async_trait::async_trait]
impl SonarClientTrait for SonarClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn validate_connection(&self) -> Result<(), SonarError> {
        debug!("Validating Sonar connectivity at {}", self.http.base_url());
        let status: SystemStatus = self.http.get("/api/system/status", &[]).await?;
        if status.status != "UP" {
            return Err(SonarError::Api(format!("Sonar is not up: status {}", status.status)));
        }
        // Status is public; touching a permission endpoint checks the credentials
        self.search_templates("").await?;
        Ok(())
    }

    async fn find_template_by_name(&self, name: &str) -> Result<Option<PermissionTemplate>, SonarError> {
        // `q` is a substring match, so filter on the exact name
        let response = self.search_templates(name).await?;
        Ok(response
            .permission_templates
            .into_iter()
            .find(|t| t.name == name))
    }

    async fn create_template(&self, request: &CreateTemplateRequest) -> Result<PermissionTemplate, SonarError> {
        if request.name.trim().is_empty() {
            return Err(SonarError::InvalidRequest("template name must not be empty".to_string()));
        }
        let mut form = vec![("name", request.name.as_str())];
        if let Some(description) = request.description.as_deref() {
            form.push(("description", description));
        }
        if let Some(pattern) = request.project_key_pattern.as_deref() {
            form.push(("projectKeyPattern", pattern));
        }
        let response: CreateTemplateResponse = self
            .http
            .post_form_json("/api/permissions/create_template", &form)
            .await?;
        Ok(response.permission_template)
    }

    async fn list_template_groups(&self, template_id: &str) -> Result<Vec<TemplateGroup>, SonarError> {
        let page_size = PAGE_SIZE.to_string();
        let mut groups = Vec::new();
        let mut page: u32 = 1;

        loop {
            let page_index = page.to_string();
            let response: TemplateGroupsResponse = self
                .http
                .get(
                    "/api/permissions/template_groups",
                    &[
                        ("templateId", template_id),
                        ("ps", page_size.as_str()),
                        ("p", page_index.as_str()),
                    ],
                )
                .await?;

            let received = response.groups.len();
            groups.extend(response.groups);

            let total = response.paging.total as usize;
            if received == 0 || groups.len() >= total {
                break;
            }
            page += 1;
        }

        Ok(groups)
    }

    async fn add_group_to_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
        self.http
            .post_form(
                "/api/permissions/add_group_to_template",
                &[
                    ("templateId", template_id),
                    ("groupName", group_name),
                    ("permission", permission),
                ],
            )
            .await
    }

    async fn remove_group_from_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError> {
        self.http
            .post_form(
                "/api/permissions/remove_group_from_template",
                &[
                    ("templateId", template_id),
                    ("groupName", group_name),
                    ("permission", permission),
                ],
            )
            .await
    }

    async fn delete_template(&self, template_id: &str) -> Result<(), SonarError> {
        self.http
            .post_form("/api/permissions/delete_template", &[("templateId", template_id)])
            .await
    }

    async fn get_default_template_id(&self) -> Result<Option<String>, SonarError> {
        let response = self.search_templates("").await?;
        Ok(response
            .default_templates
            .into_iter()
            .find(|d| d.qualifier == PROJECT_QUALIFIER)
            .map(|d| d.template_id))
    }

    async fn set_default_template(&self, template_id: &str) -> Result<(), SonarError> {
        self.http
            .post_form(
                "/api/permissions/set_default_template",
                &[("templateId", template_id), ("qualifier", PROJECT_QUALIFIER)],
            )
            .await
    }

    async fn change_password(&self, login: &str, previous_password: &str, password: &str) -> Result<(), SonarError> {
        self.http
            .post_form(
                "/api/users/change_password",
                &[
                    ("login", login),
                    ("previousPassword", previous_password),
                    ("password", password),
                ],
            )
            .await
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>, SonarError> {
        // `q` matches login and name partially
        let response: SearchUsersResponse = self.http.get("/api/users/search", &[("q", login)]).await?;
        Ok(response.users.into_iter().find(|u| u.login == login))
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, SonarError> {
        if request.login.trim().is_empty() {
            return Err(SonarError::InvalidRequest("user login must not be empty".to_string()));
        }
        let response: CreateUserResponse = self
            .http
            .post_form_json(
                "/api/users/create",
                &[
                    ("login", request.login.as_str()),
                    ("name", request.name.as_str()),
                    ("password", request.password.as_str()),
                    ("local", "true"),
                ],
            )
            .await?;
        Ok(response.user)
    }

    async fn generate_token(&self, login: &str, name: &str) -> Result<UserToken, SonarError> {
        self.http
            .post_form_json("/api/user_tokens/generate", &[("login", login), ("name", name)])
            .await
    }

    async fn revoke_token(&self, login: &str, name: &str) -> Result<(), SonarError> {
        self.http
            .post_form("/api/user_tokens/revoke", &[("login", login), ("name", name)])
            .await
    }
}
