//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::errors::AppError;

const USER_AGENT: &str = concat!("ezdeploy/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the source control API
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request, authenticated when a token is given
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(status_error(status, &url, &body));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

fn status_error(status: StatusCode, url: &str, body: &str) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::ConfigError(format!("Source control rejected credentials: {}", status))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            AppError::SourceFetch(format!("{}: {}", status, body))
        }
        _ => AppError::Internal(format!("{}: {}", status, body)),
    }
}
