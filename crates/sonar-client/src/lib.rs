//! Sonar REST API Client
//!
//! A Rust client for the administrative API of a SonarQube-compatible
//! code-quality service. It covers what the Sonar operator drives:
//! permission templates, their group bindings, the default template and the
//! admin and CI accounts.
//!
//! # Example
//!
//! ```no_run
//! use sonar_client::{CreateTemplateRequest, SonarClient, SonarClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SonarClient::new(
//!     "http://sonar.ci:9000".to_string(),
//!     "admin".to_string(),
//!     "admin-password".to_string(),
//! )?;
//!
//! let template = match client.find_template_by_name("team-a").await? {
//!     Some(existing) => existing,
//!     None => {
//!         client
//!             .create_template(&CreateTemplateRequest {
//!                 name: "team-a".to_string(),
//!                 description: None,
//!                 project_key_pattern: Some("team-a-.*".to_string()),
//!             })
//!             .await?
//!     }
//! };
//! client.add_group_to_template(&template.id, "team-a", "admin").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod sonar_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{build_http_client, SonarClient};
pub use common::HttpClient;
pub use error::SonarError;
pub use models::*;
pub use sonar_trait::SonarClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSonarClient;
