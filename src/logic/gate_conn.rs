//! Client side of the link between the logic tier and one gateway

use async_trait::async_trait;
use log::debug;
use std::time::Duration;

use crate::error::{Result, RustyPushError};

/// A remote gateway instance that accepts serialized item batches
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Name used in logs and stats
    fn name(&self) -> &str;

    async fn push_all(&self, batch: &[u8]) -> Result<()>;

    async fn push_room(&self, room_id: &str, batch: &[u8]) -> Result<()>;

    async fn push_room_one(&self, room_id: &str, batch: &[u8]) -> Result<()>;
}

/// Gateway reached over its HTTP push service
pub struct HttpGatewayConnection {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGatewayConnection {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RustyPushError::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, room_id: Option<&str>, batch: &[u8]) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url);
        if let Some(room_id) = room_id {
            request = request.query(&[("room", room_id)]);
        }
        let response = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(batch.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RustyPushError::GatewayError(format!(
                "{} responded with {}",
                url, status
            )));
        }
        debug!("Pushed {} bytes to {}", batch.len(), url);
        Ok(())
    }
}

#[async_trait]
impl GatewayConnection for HttpGatewayConnection {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn push_all(&self, batch: &[u8]) -> Result<()> {
        self.post("/push/all", None, batch).await
    }

    async fn push_room(&self, room_id: &str, batch: &[u8]) -> Result<()> {
        self.post("/push/room", Some(room_id), batch).await
    }

    async fn push_room_one(&self, room_id: &str, batch: &[u8]) -> Result<()> {
        self.post("/push/room_one", Some(room_id), batch).await
    }
}
