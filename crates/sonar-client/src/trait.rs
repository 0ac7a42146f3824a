//! Trait abstraction for the Sonar client to enable mocking in tests

use crate::error::SonarError;
use crate::models::*;

/// Operations the controller performs against a Sonar instance.
///
/// Implementations must be safe to share across concurrent reconciles.
#[async_trait::async_trait]
pub trait SonarClientTrait: Send + Sync {
    /// Base URL of the instance
    fn base_url(&self) -> &str;

    /// Checks that the instance is up and the credentials are accepted
    async fn validate_connection(&self) -> Result<(), SonarError>;

    /// Finds a permission template by exact name. `Ok(None)` when none exists.
    async fn find_template_by_name(&self, name: &str) -> Result<Option<PermissionTemplate>, SonarError>;

    /// Creates a permission template and returns it with its assigned id
    async fn create_template(&self, request: &CreateTemplateRequest) -> Result<PermissionTemplate, SonarError>;

    /// Lists the groups holding at least one permission on a template
    async fn list_template_groups(&self, template_id: &str) -> Result<Vec<TemplateGroup>, SonarError>;

    /// Grants one permission to one group on a template
    async fn add_group_to_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError>;

    /// Revokes one permission from one group on a template
    async fn remove_group_from_template(&self, template_id: &str, group_name: &str, permission: &str) -> Result<(), SonarError>;

    /// Deletes a permission template
    async fn delete_template(&self, template_id: &str) -> Result<(), SonarError>;

    /// Id of the default template for projects, if any
    async fn get_default_template_id(&self) -> Result<Option<String>, SonarError>;

    /// Makes a template the default for projects
    async fn set_default_template(&self, template_id: &str) -> Result<(), SonarError>;

    /// Changes a user's password. `previous_password` is checked by the service.
    async fn change_password(&self, login: &str, previous_password: &str, password: &str) -> Result<(), SonarError>;

    /// Finds a user by exact login. `Ok(None)` when none exists.
    async fn find_user(&self, login: &str) -> Result<Option<User>, SonarError>;

    /// Creates a local user
    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, SonarError>;

    /// Issues a named token for a user
    async fn generate_token(&self, login: &str, name: &str) -> Result<UserToken, SonarError>;

    /// Revokes a named token. Revoking an unknown token is not an error.
    async fn revoke_token(&self, login: &str, name: &str) -> Result<(), SonarError>;
}
