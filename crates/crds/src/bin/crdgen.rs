//! # CRD Generator
//!
//! Generates the CustomResourceDefinition YAML for `Sonar` and
//! `SonarPermissionTemplate` from the Rust type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run -p crds --bin crdgen > config/crd/sonar.yaml
//!
//! # Generate and apply directly
//! cargo run -p crds --bin crdgen | kubectl apply -f -
//! ```

use crds::{Sonar, SonarPermissionTemplate};
use kube::CustomResourceExt;

fn main() {
    for crd in [Sonar::crd(), SonarPermissionTemplate::crd()] {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                print!("---\n{}", yaml);
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {}", e);
                std::process::exit(1);
            }
        }
    }
}
