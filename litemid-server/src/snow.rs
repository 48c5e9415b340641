//! ServiceNow table API client
//!
//! One outbound call per invocation, no retry, no caching. Success for the
//! ECC queue write means a 200/201 status, no embedded error message, and a
//! non-empty sys_id in the decoded body.

use crate::config::ServiceNowConfig;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ECC_QUEUE_PATH: &str = "/api/now/table/ecc_queue";
pub const CONNECTION_TEST_PATH: &str = "/api/now/table/sys_user";

#[derive(Debug, Error)]
pub enum SnowError {
    #[error("request to ServiceNow failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ServiceNow API error: {code} - {body}")]
    Status { code: u16, body: String },
    #[error("failed to parse ServiceNow response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
    #[error("ServiceNow error: {message} - {detail}")]
    Api { message: String, detail: String },
    #[error("ServiceNow error: no sys_id returned in response")]
    MissingSysId,
}

/// One record bound for the ECC queue table.
#[derive(Debug, Clone, Serialize)]
pub struct QueuePayload {
    pub agent: String,
    pub topic: String,
    pub name: String,
    pub source: String,
    pub payload: serde_json::Value,
}

// Only the fields the client inspects; everything else in the ServiceNow
// response is ignored.
#[derive(Debug, Default, Deserialize)]
struct EccQueueResponse {
    #[serde(default)]
    result: EccQueueResult,
    #[serde(default)]
    error: EccQueueError,
}

#[derive(Debug, Default, Deserialize)]
struct EccQueueResult {
    #[serde(default)]
    sys_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct EccQueueError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: String,
}

#[derive(Clone)]
pub struct SnowClient {
    instance: String,
    username: String,
    password: String,
    use_https: bool,
    http: reqwest::Client,
}

impl SnowClient {
    pub fn new(config: &ServiceNowConfig) -> Result<Self, SnowError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            instance: config.instance.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            use_https: config.use_https,
            http,
        })
    }

    pub fn instance_url(&self) -> String {
        let proto = if self.use_https { "https" } else { "http" };
        format!("{proto}://{}", self.instance)
    }

    /// Insert one record into the ECC queue; returns the assigned sys_id.
    pub async fn send_to_ecc_queue(&self, payload: &QueuePayload) -> Result<String, SnowError> {
        let url = format!("{}{ECC_QUEUE_PATH}", self.instance_url());
        debug!("posting payload to {url}");

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(header::ACCEPT, "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(SnowError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let decoded: EccQueueResponse =
            serde_json::from_str(&body).map_err(SnowError::MalformedResponse)?;

        if !decoded.error.message.is_empty() {
            return Err(SnowError::Api {
                message: decoded.error.message,
                detail: decoded.error.detail,
            });
        }
        if decoded.result.sys_id.is_empty() {
            return Err(SnowError::MissingSysId);
        }

        Ok(decoded.result.sys_id)
    }

    /// Lightweight authenticated GET confirming reachability and credentials.
    /// Every call is a fresh round trip; nothing is cached between calls.
    pub async fn test_connection(&self) -> Result<(), SnowError> {
        let url = format!("{}{CONNECTION_TEST_PATH}", self.instance_url());

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SnowError::Status {
                code: response.status().as_u16(),
                body: String::new(),
            });
        }

        Ok(())
    }
}
