//! Sonar operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Sonar operator:
//! - `Sonar`: a managed code-quality service instance
//! - `SonarPermissionTemplate`: a permission template configured inside it

pub mod permission_template;
pub mod sonar;
pub mod status;

pub use permission_template::*;
pub use sonar::*;
pub use status::StatusOwner;
