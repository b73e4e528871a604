//! HTTP client for the provisioner's operational API.

use anyhow::{Context, Result};
use brokerd_messages::ErrorResponse;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CliError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    /// POST with an optional JSON body. `None` sends an empty body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, CliError> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {e}")));
        }

        let status = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => CliError::Api {
                status,
                code: err.msg.code,
                message: err.msg.description,
            },
            Err(_) => CliError::Api {
                status,
                code: 0,
                message: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                },
            },
        })
    }
}
