use async_trait::async_trait;
use marketplace_shared::OrderSnapshot;
use sqlx::PgPool;
use uuid::Uuid;

use crate::workflows::{CollaboratorError, CollaboratorResult, OrderDirectory};

/// Reads order snapshots from the `orders` table owned by the order service.
#[derive(Debug, Clone)]
pub struct PgOrderDirectory {
    db_pool: PgPool,
}

impl PgOrderDirectory {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrderDirectory for PgOrderDirectory {
    async fn fetch(&self, order_id: Uuid) -> CollaboratorResult<Option<OrderSnapshot>> {
        sqlx::query_as::<_, OrderSnapshot>(
            r#"
            SELECT id, customer_id, vendor_id, total_amount, currency, item_count,
                   payment_method, shipping_country, metadata, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| CollaboratorError::retryable(format!("order lookup failed: {}", e)))
    }
}
