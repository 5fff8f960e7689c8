//! Render REST API client.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ComputeTarget, ServiceInfo, ServiceStatus};
use crate::error::CollaboratorError;

/// Compute target backed by the Render platform API.
pub struct RenderTarget {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ServiceEnvelope {
    service: RenderService,
}

#[derive(Debug, Deserialize)]
struct RenderService {
    id: String,
    name: String,
    #[serde(default)]
    suspended: Option<String>,
}

impl RenderService {
    fn status(&self) -> ServiceStatus {
        match self.suspended.as_deref() {
            Some("suspended") => ServiceStatus::Suspended,
            Some("not_suspended") => ServiceStatus::Active,
            _ => ServiceStatus::Unknown,
        }
    }
}

impl RenderTarget {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn post(&self, path: &str, body: Option<serde_json::Value>) -> Result<bool, CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).bearer_auth(&self.api_key);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!(%url, %status, "render rejected operation");
        }
        Ok(status.is_success())
    }
}

#[async_trait::async_trait]
impl ComputeTarget for RenderTarget {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, CollaboratorError> {
        let url = format!("{}/services?limit=100", self.base_url);
        let resp = self.client.get(&url).bearer_auth(&self.api_key).send().await?;
        let resp = resp.error_for_status()?;
        let envelopes: Vec<ServiceEnvelope> = resp.json().await?;
        debug!(count = envelopes.len(), "listed render services");
        Ok(envelopes
            .into_iter()
            .map(|e| ServiceInfo {
                status: e.service.status(),
                id: e.service.id,
                name: e.service.name,
            })
            .collect())
    }

    async fn get_status(&self, id: &str) -> Result<ServiceStatus, CollaboratorError> {
        let url = format!("{}/services/{}", self.base_url, id);
        let resp = self.client.get(&url).bearer_auth(&self.api_key).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(id.to_string()));
        }
        let service: RenderService = resp.error_for_status()?.json().await?;
        Ok(service.status())
    }

    async fn restart(&self, id: &str) -> Result<bool, CollaboratorError> {
        self.post(&format!("/services/{}/restart", id), None).await
    }

    async fn scale(&self, id: &str, instances: u32) -> Result<bool, CollaboratorError> {
        self.post(
            &format!("/services/{}/scale", id),
            Some(serde_json::json!({ "numInstances": instances })),
        )
        .await
    }

    async fn resume(&self, id: &str) -> Result<bool, CollaboratorError> {
        self.post(&format!("/services/{}/resume", id), None).await
    }
}
