use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{check_response, transport_error};
use crate::workflows::{CollaboratorResult, InventoryService};

const SERVICE: &str = "inventory service";

#[derive(Debug, Serialize)]
struct InventoryRequest {
    order_id: Uuid,
}

/// Inventory service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInventoryService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, operation: &str, order_id: Uuid) -> CollaboratorResult<()> {
        let url = format!("{}/api/v1/inventory/{}", self.base_url, operation);
        let response = self
            .client
            .post(&url)
            .json(&InventoryRequest { order_id })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        check_response(SERVICE, response).await?;
        info!("Inventory {} succeeded for order {}", operation, order_id);
        Ok(())
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    async fn reserve(&self, order_id: Uuid) -> CollaboratorResult<()> {
        self.post("reserve", order_id).await
    }

    async fn allocate(&self, order_id: Uuid) -> CollaboratorResult<()> {
        self.post("allocate", order_id).await
    }
}
