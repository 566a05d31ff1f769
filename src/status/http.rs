//! JSON-over-HTTP status provider.
//!
//! Fetches `GET {base_url}/entities/{id}/status` and expects a
//! [`StatusSnapshot`] body. Vendor translation layers sit behind that URL.

use super::{FetchError, StatusProvider, StatusSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

pub struct HttpStatusProvider {
    /// Base URL (e.g., "http://localhost:8081"), no trailing slash
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpStatusProvider {
    /// Creates a provider with a per-request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn status_url(&self, entity_id: &str) -> String {
        format!(
            "{}/entities/{}/status",
            self.base_url,
            urlencoding::encode(entity_id)
        )
    }
}

#[async_trait]
impl StatusProvider for HttpStatusProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, entity_id: &str) -> Result<StatusSnapshot, FetchError> {
        let url = self.status_url(entity_id);
        debug!(entity_id = %entity_id, url = %url, "Fetching entity status");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport_error)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status => return Err(FetchError::Status(status.as_u16())),
        }

        response
            .json::<StatusSnapshot>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(url: String) -> HttpStatusProvider {
        HttpStatusProvider::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/entities/car-1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"level":64.5,"active":true,"limit":90,"location":{"latitude":52.52,"longitude":13.405},"speed":0,"timestamp":"2024-02-11T13:00:00Z"}"#,
            )
            .create_async()
            .await;

        let snapshot = provider(server.url()).fetch("car-1").await.unwrap();

        assert_eq!(snapshot.level, 64.5);
        assert!(snapshot.active);
        assert_eq!(snapshot.limit, Some(90.0));
        assert_eq!(snapshot.location.unwrap().latitude, 52.52);
        assert!(!snapshot.is_moving());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_entity_id_is_url_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/entities/fleet%2Fcar%201/status")
            .with_status(200)
            .with_body(r#"{"level":50}"#)
            .create_async()
            .await;

        let result = provider(server.url()).fetch("fleet/car 1").await;
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/entities/car-1/status")
            .with_status(429)
            .create_async()
            .await;

        let result = provider(server.url()).fetch("car-1").await;
        assert_eq!(result.unwrap_err(), FetchError::RateLimited);
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/entities/car-1/status")
            .with_status(503)
            .create_async()
            .await;

        let result = provider(server.url()).fetch("car-1").await;
        assert_eq!(result.unwrap_err(), FetchError::Status(503));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/entities/car-1/status")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = provider(server.url()).fetch("car-1").await;
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        // Nothing listens on port 9
        let result = provider("http://127.0.0.1:9".to_string())
            .fetch("car-1")
            .await;
        assert!(matches!(
            result,
            Err(FetchError::Network(_)) | Err(FetchError::Timeout)
        ));
    }
}
