//! Common utilities for the Redfish client
//!
//! Shared HTTP plumbing: URL building against a BMC, basic auth, and status
//! classification into [`RedfishError`].

use crate::error::RedfishError;
use crate::models::BmcEndpoint;
use reqwest::header::LOCATION;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Root of the Redfish service on every BMC
pub const REDFISH_ROOT: &str = "/redfish/v1/";

/// HTTP client wrapper with per-call timeout
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client; `insecure_tls` accepts self-signed BMC certificates
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self, RedfishError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self { client })
    }

    /// Build a full URL from a path relative to the service root, or from an
    /// absolute `/redfish/v1/...` path as found in `@odata.id` links
    pub fn build_url(&self, bmc: &BmcEndpoint, path: &str) -> String {
        if path.starts_with("http") {
            return path.to_string();
        }
        let authority = match bmc.port {
            Some(port) => format!("{}:{}", bmc.address, port),
            None => bmc.address.clone(),
        };
        if path.starts_with('/') {
            format!("https://{authority}{path}")
        } else {
            format!("https://{authority}{REDFISH_ROOT}{path}")
        }
    }

    async fn check(response: Response, context: &str) -> Result<Response, RedfishError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RedfishError::from_status(status, context, &body))
    }

    fn classify(err: reqwest::Error, context: &str) -> RedfishError {
        if err.is_timeout() || err.is_connect() {
            RedfishError::Transient(format!("{context}: {err}"))
        } else {
            RedfishError::Http(err)
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, bmc: &BmcEndpoint, path: &str) -> Result<T, RedfishError> {
        let url = self.build_url(bmc, path);
        debug!("GET {}", url);
        let context = format!("GET {path}");

        let response = self
            .client
            .get(&url)
            .basic_auth(&bmc.username, Some(&bmc.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Self::classify(e, &context))?;
        let response = Self::check(response, &context).await?;

        let text = response.text().await.map_err(|e| Self::classify(e, &context))?;
        serde_json::from_str(&text).map_err(|e| {
            RedfishError::Fatal(format!(
                "error decoding {}: {} - Response (first 500 chars): {}",
                path,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a POST request; returns the task monitor location if the BMC
    /// hands one out (Location header or `@odata.id` of the body)
    pub async fn post(
        &self,
        bmc: &BmcEndpoint,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Option<String>, RedfishError> {
        let url = self.build_url(bmc, path);
        debug!("POST {} with body: {}", url, body);
        let context = format!("POST {path}");

        let response = self
            .client
            .post(&url)
            .basic_auth(&bmc.username, Some(&bmc.password))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Self::classify(e, &context))?;
        let response = Self::check(response, &context).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if location.is_some() {
            return Ok(location);
        }
        let text = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("@odata.id").and_then(|id| id.as_str()).map(str::to_string)))
    }

    /// Make a PATCH request
    pub async fn patch(
        &self,
        bmc: &BmcEndpoint,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), RedfishError> {
        let url = self.build_url(bmc, path);
        debug!("PATCH {} with body: {}", url, body);
        let context = format!("PATCH {path}");

        let response = self
            .client
            .patch(&url)
            .basic_auth(&bmc.username, Some(&bmc.password))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Self::classify(e, &context))?;
        Self::check(response, &context).await?;
        Ok(())
    }
}
