use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{check_response, transport_error};
use crate::workflows::{CollaboratorResult, CommissionService};

const SERVICE: &str = "commission service";

#[derive(Debug, Serialize)]
struct BulkCalculateRequest<'a> {
    order_ids: &'a [Uuid],
}

#[derive(Debug, Clone)]
pub struct HttpCommissionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCommissionService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CommissionService for HttpCommissionService {
    async fn bulk_calculate(&self, order_ids: Vec<Uuid>) -> CollaboratorResult<()> {
        let url = format!("{}/api/v1/commissions/bulk-calculate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&BulkCalculateRequest { order_ids: &order_ids })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        check_response(SERVICE, response).await?;
        info!("Commissions calculated for {} order(s)", order_ids.len());
        Ok(())
    }
}
