//! Dapr state-store client speaking the sidecar HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::{StateBackend, StateStoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DaprStateConfig` used to build a [`DaprStateBackend`].
pub struct DaprStateConfig {
    pub base_url: String,
    pub store_name: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for DaprStateConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3500".to_string(),
            store_name: "dev-statestore".to_string(),
            api_token: None,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone)]
/// [`StateBackend`] backed by a Dapr sidecar state component.
pub struct DaprStateBackend {
    http: reqwest::Client,
    state_url: String,
}

impl DaprStateBackend {
    pub fn new(config: DaprStateConfig) -> Result<Self, StateStoreError> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(StateStoreError::InvalidConfig(
                "dapr base url must not be empty".to_string(),
            ));
        }
        let store_name = config.store_name.trim();
        if store_name.is_empty() {
            return Err(StateStoreError::InvalidConfig(
                "dapr state store name must not be empty".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = config
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            let value = reqwest::header::HeaderValue::from_str(token).map_err(|error| {
                StateStoreError::InvalidConfig(format!("invalid dapr api token: {error}"))
            })?;
            headers.insert("dapr-api-token", value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            state_url: format!("{base_url}/v1.0/state/{store_name}"),
        })
    }
}

#[async_trait]
impl StateBackend for DaprStateBackend {
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StateStoreError> {
        let payload = json!([{
            "key": key,
            "value": value,
            "metadata": {
                "ttlInSeconds": ttl.as_secs().max(1).to_string(),
            },
        }]);
        let response = self.http.post(&self.state_url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StateStoreError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(key, ttl_seconds = ttl.as_secs(), "dapr state saved");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let response = self
            .http
            .get(format!("{}/{}", self.state_url, key))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StateStoreError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::{DaprStateBackend, DaprStateConfig};
    use crate::{StateBackend, StateStoreError};

    fn backend_for(server: &MockServer) -> DaprStateBackend {
        DaprStateBackend::new(DaprStateConfig {
            base_url: server.base_url(),
            store_name: "dev-statestore".to_string(),
            api_token: Some("secret".to_string()),
            request_timeout_ms: 2_000,
        })
        .expect("dapr backend")
    }

    #[tokio::test]
    async fn integration_dapr_set_posts_state_with_ttl_metadata() {
        let server = MockServer::start();
        let save = server.mock(|when, then| {
            when.method(POST)
                .path("/v1.0/state/dev-statestore")
                .header("dapr-api-token", "secret")
                .json_body(json!([{
                    "key": "discollama:message:42",
                    "value": [1, 2, 3],
                    "metadata": {"ttlInSeconds": "604800"}
                }]));
            then.status(204);
        });

        backend_for(&server)
            .set(
                "discollama:message:42",
                &json!([1, 2, 3]),
                Duration::from_secs(604_800),
            )
            .await
            .expect("save state");
        save.assert();
    }

    #[tokio::test]
    async fn integration_dapr_get_reads_raw_value_and_misses() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1.0/state/dev-statestore/discollama:channel:7");
            then.status(200).body("\"42\"");
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1.0/state/dev-statestore/discollama:channel:8");
            then.status(204);
        });

        let backend = backend_for(&server);
        assert_eq!(
            backend
                .get("discollama:channel:7")
                .await
                .expect("get hit")
                .as_deref(),
            Some("\"42\"")
        );
        assert_eq!(
            backend.get("discollama:channel:8").await.expect("get miss"),
            None
        );
    }

    #[tokio::test]
    async fn regression_dapr_server_errors_propagate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1.0/state/dev-statestore/discollama:channel:9");
            then.status(500).body("ERR_STATE_GET");
        });

        let error = backend_for(&server)
            .get("discollama:channel:9")
            .await
            .expect_err("server error");
        assert!(matches!(
            error,
            StateStoreError::HttpStatus { status: 500, ref body } if body == "ERR_STATE_GET"
        ));
    }

    #[test]
    fn regression_blank_store_name_is_rejected() {
        let error = DaprStateBackend::new(DaprStateConfig {
            store_name: " ".to_string(),
            ..DaprStateConfig::default()
        })
        .expect_err("blank store");
        assert!(matches!(error, StateStoreError::InvalidConfig(_)));
    }
}
