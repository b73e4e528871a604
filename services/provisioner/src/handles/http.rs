//! Canonical handle store over HTTP.

use async_trait::async_trait;
use brokerd_messages::ServiceHandle;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use super::{HandleSource, HandleSourceError};
use crate::config::HandleStoreConfig;

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

#[derive(Debug, Deserialize)]
struct HandlesEnvelope {
    #[serde(default)]
    handles: Vec<ServiceHandle>,
}

#[derive(Debug, Clone)]
pub struct HttpHandleSource {
    client: reqwest::Client,
    base_url: String,
    label: String,
}

impl HttpHandleSource {
    pub fn new(config: &HandleStoreConfig) -> Result<Self, HandleSourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| HandleSourceError::Unavailable("invalid service token".into()))?;
            headers.insert(SERVICE_TOKEN_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            label: config.label.clone(),
        })
    }

    fn handles_url(&self) -> String {
        format!(
            "{}/services/v1/offerings/{}/handles",
            self.base_url, self.label
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, HandleSourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(HandleSourceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl HandleSource for HttpHandleSource {
    async fn fetch_handles(&self) -> Result<Vec<ServiceHandle>, HandleSourceError> {
        let response = self.client.get(self.handles_url()).send().await?;
        let envelope: HandlesEnvelope = Self::check(response).await?.json().await?;
        debug!(count = envelope.handles.len(), "Fetched handles");
        Ok(envelope.handles)
    }

    async fn update_handle(&self, handle: &ServiceHandle) -> Result<(), HandleSourceError> {
        let url = format!("{}/{}", self.handles_url(), handle.service_id);
        let response = self.client.post(url).json(handle).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerd_messages::Credentials;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> HandleStoreConfig {
        HandleStoreConfig {
            url: format!("{url}/"),
            label: "mysql-1.0".to_string(),
            token: Some("s3cret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_handles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/v1/offerings/mysql-1.0/handles"))
            .and(header(SERVICE_TOKEN_HEADER, "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "handles": [{
                    "service_id": "i1",
                    "configuration": {"plan": "free"},
                    "credentials": {"name": "i1", "node_id": "n1"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpHandleSource::new(&config(&server.uri())).unwrap();
        let handles = source.fetch_handles().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].node_id(), Some("n1"));
    }

    #[tokio::test]
    async fn test_update_posts_handle() {
        let server = MockServer::start().await;
        let handle = ServiceHandle {
            service_id: "i1".to_string(),
            configuration: json!({"plan": "free"}),
            credentials: Credentials::new().with("name", "i1").with("node_id", "n2"),
        };
        Mock::given(method("POST"))
            .and(path("/services/v1/offerings/mysql-1.0/handles/i1"))
            .and(body_json(&handle))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpHandleSource::new(&config(&server.uri())).unwrap();
        source.update_handle(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let source = HttpHandleSource::new(&config(&server.uri())).unwrap();
        match source.fetch_handles().await.unwrap_err() {
            HandleSourceError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
