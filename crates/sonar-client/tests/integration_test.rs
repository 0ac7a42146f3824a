//! Integration tests for the Sonar client
//!
//! These tests require a running Sonar instance.
//! Set SONAR_URL, SONAR_USER and SONAR_PASSWORD environment variables to run.

use sonar_client::{CreateTemplateRequest, SonarClient, SonarClientTrait};

fn client_from_env() -> SonarClient {
    let url = std::env::var("SONAR_URL")
        .unwrap_or_else(|_| "http://localhost:9000".to_string());
    let user = std::env::var("SONAR_USER").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("SONAR_PASSWORD")
        .expect("SONAR_PASSWORD environment variable must be set");

    SonarClient::new(url, user, password).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running Sonar instance
async fn test_validate_connection() {
    let client = client_from_env();
    client
        .validate_connection()
        .await
        .expect("Sonar should be up and accept the credentials");
}

#[tokio::test]
#[ignore]
async fn test_missing_template_is_none() {
    let client = client_from_env();
    let found = client
        .find_template_by_name("sonar-client-it-does-not-exist")
        .await
        .expect("Failed to search templates");
    assert!(found.is_none());
}

#[tokio::test]
#[ignore]
async fn test_template_lifecycle() {
    let client = client_from_env();
    let name = format!("sonar-client-it-{}", std::process::id());

    let template = client
        .create_template(&CreateTemplateRequest {
            name: name.clone(),
            description: Some("integration test".to_string()),
            project_key_pattern: Some("it-.*".to_string()),
        })
        .await
        .expect("Failed to create template");

    client
        .add_group_to_template(&template.id, "sonar-users", "user")
        .await
        .expect("Failed to grant");
    let groups = client
        .list_template_groups(&template.id)
        .await
        .expect("Failed to list groups");
    assert!(groups
        .iter()
        .any(|g| g.name == "sonar-users" && g.permissions.iter().any(|p| p == "user")));

    client
        .remove_group_from_template(&template.id, "sonar-users", "user")
        .await
        .expect("Failed to revoke");
    client
        .delete_template(&template.id)
        .await
        .expect("Failed to delete template");

    let found = client.find_template_by_name(&name).await.expect("Failed to search");
    assert!(found.is_none());
}

#[tokio::test]
#[ignore]
async fn test_token_lifecycle() {
    let client = client_from_env();
    let user = std::env::var("SONAR_USER").unwrap_or_else(|_| "admin".to_string());
    let name = format!("sonar-client-it-{}", std::process::id());

    assert!(client
        .find_user(&user)
        .await
        .expect("Failed to search users")
        .is_some());

    let token = client
        .generate_token(&user, &name)
        .await
        .expect("Failed to generate token");
    assert!(!token.token.is_empty());

    client
        .revoke_token(&user, &name)
        .await
        .expect("Failed to revoke token");
}
