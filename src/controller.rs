//! Controller transport.
//!
//! The core talks to the SDN controller only through [`Controller`]: fetch an
//! object by path and write, post or delete at a path. [`RestconfClient`] is
//! the reqwest implementation for an OpenDaylight RESTCONF server.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::SdnError;

/// Read and write access to the controller's REST tree.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, SdnError>;
    async fn put(&self, path: &str, body: &Value) -> Result<(), SdnError>;
    async fn post(&self, path: &str, body: &Value) -> Result<(), SdnError>;
    async fn delete(&self, path: &str) -> Result<(), SdnError>;
}

/// Connection settings for [`RestconfClient`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base URL, e.g. `http://127.0.0.1:8181`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

pub struct RestconfClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl RestconfClient {
    pub fn new(config: ControllerConfig) -> Result<Self, SdnError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(concat!("sdnctl/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!("... {}: {} ...", method, path);
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response, SdnError> {
        let response = builder.send().await?;
        check_status(response.status(), path)?;
        Ok(response)
    }
}

/// 404 is a lookup miss; anything else outside 2xx is unexpected.
pub(crate) fn check_status(status: StatusCode, path: &str) -> Result<(), SdnError> {
    if status == StatusCode::NOT_FOUND {
        return Err(SdnError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        return Err(SdnError::UnexpectedStatus {
            status: status.as_u16(),
            path: path.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Controller for RestconfClient {
    async fn get(&self, path: &str) -> Result<Value, SdnError> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        Ok(response.json().await?)
    }

    async fn put(&self, path: &str, body: &Value) -> Result<(), SdnError> {
        self.send(self.request(Method::PUT, path).json(body), path)
            .await
            .map(drop)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), SdnError> {
        self.send(self.request(Method::POST, path).json(body), path)
            .await
            .map(drop)
    }

    async fn delete(&self, path: &str) -> Result<(), SdnError> {
        self.send(self.request(Method::DELETE, path), path)
            .await
            .map(drop)
    }
}

/// In-memory controller for tests: serves canned GET responses and records
/// every write in order.
#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Put(String, Value),
        Post(String, Value),
        Delete(String),
    }

    #[derive(Default)]
    pub struct RecordingController {
        pub responses: HashMap<String, Value>,
        pub calls: Mutex<Vec<Call>>,
        /// Writes that succeed before every further write fails.
        pub fail_after: Option<usize>,
    }

    impl RecordingController {
        pub fn with_response(mut self, path: &str, body: Value) -> Self {
            self.responses.insert(path.to_string(), body);
            self
        }

        pub fn failing_after(mut self, writes: usize) -> Self {
            self.fail_after = Some(writes);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> Result<(), SdnError> {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_after.is_some_and(|n| calls.len() >= n) {
                return Err(SdnError::UnexpectedStatus {
                    status: 500,
                    path: match call {
                        Call::Put(p, _) | Call::Post(p, _) | Call::Delete(p) => p,
                    },
                });
            }
            calls.push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl Controller for RecordingController {
        async fn get(&self, path: &str) -> Result<Value, SdnError> {
            self.responses
                .get(path)
                .cloned()
                .ok_or_else(|| SdnError::NotFound(path.to_string()))
        }

        async fn put(&self, path: &str, body: &Value) -> Result<(), SdnError> {
            self.record(Call::Put(path.to_string(), body.clone()))
        }

        async fn post(&self, path: &str, body: &Value) -> Result<(), SdnError> {
            self.record(Call::Post(path.to_string(), body.clone()))
        }

        async fn delete(&self, path: &str) -> Result<(), SdnError> {
            self.record(Call::Delete(path.to_string()))
        }
    }
}
