//! Common utilities for the Sonar API client
//!
//! Provides the authenticated HTTP wrapper shared by every API call.

use crate::error::SonarError;
use crate::models::ErrorResponse;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client wrapper with basic authentication
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, username: String, password: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Build a URL-encoded query string
    pub fn build_query_string(&self, params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SonarError> {
        let url = if query.is_empty() {
            self.build_url(path)
        } else {
            format!("{}?{}", self.build_url(path), self.build_query_string(query))
        };
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(SonarError::Http)?;

        let response = check_status("GET", path, response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            SonarError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a form-encoded POST request that returns no body
    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(), SonarError> {
        self.send_form(path, form).await.map(|_| ())
    }

    /// Make a form-encoded POST request and decode the JSON response
    pub async fn post_form_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, SonarError> {
        let response = self.send_form(path, form).await?;
        response.json().await.map_err(SonarError::Http)
    }

    async fn send_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Response, SonarError> {
        let url = self.build_url(path);
        // Only parameter names are logged
        debug!(
            "POST {} with fields: {:?}",
            url,
            form.iter().map(|(k, _)| *k).collect::<Vec<_>>()
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(SonarError::Http)?;

        check_status("POST", path, response).await
    }
}

/// Maps non-success responses onto `SonarError`.
async fn check_status(method: &str, path: &str, response: Response) -> Result<Response, SonarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = ErrorResponse::describe(&body);
    Err(match status {
        StatusCode::NOT_FOUND => {
            SonarError::NotFound(format!("Resource not found: {} - {}", path, detail))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SonarError::Authentication(format!(
            "{} {} rejected: {} - {}",
            method, path, status, detail
        )),
        StatusCode::BAD_REQUEST => SonarError::InvalidRequest(format!(
            "{} {} failed: {} - {}",
            method, path, status, detail
        )),
        _ => SonarError::Api(format!("{} {} failed: {} - {}", method, path, status, detail)),
    })
}
