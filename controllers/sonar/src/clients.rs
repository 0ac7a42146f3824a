//! Sonar API clients per managed instance.
//!
//! All clients share one `reqwest::Client`, so one connection pool serves
//! every concurrent reconcile. Which account a client uses is decided by the
//! reconciler, normally the instance's admin secret.

use crds::Sonar;
use sonar_client::{SonarClient, SonarClientTrait};
use std::sync::Arc;

/// Hands out API clients for a Sonar instance.
pub trait SonarClientProvider: Send + Sync {
    /// Client for the instance, authenticated as `login`.
    fn client_as(&self, sonar: &Sonar, login: &str, password: &str) -> Arc<dyn SonarClientTrait>;
}

/// Builds REST clients on the shared connection pool.
pub struct HttpClientProvider {
    http: reqwest::Client,
}

impl HttpClientProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl SonarClientProvider for HttpClientProvider {
    fn client_as(&self, sonar: &Sonar, login: &str, password: &str) -> Arc<dyn SonarClientTrait> {
        Arc::new(SonarClient::with_http_client(
            self.http.clone(),
            sonar.service_url(),
            login.to_string(),
            password.to_string(),
        ))
    }
}

/// Hands out handles on one mock instance, each with its own credentials.
#[cfg(test)]
pub struct MockClientProvider(pub sonar_client::MockSonarClient);

#[cfg(test)]
impl SonarClientProvider for MockClientProvider {
    fn client_as(&self, _sonar: &Sonar, login: &str, password: &str) -> Arc<dyn SonarClientTrait> {
        Arc::new(self.0.with_credentials(login, password))
    }
}
