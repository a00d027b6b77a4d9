// External collaborators the workflow engine calls into

use async_trait::async_trait;
use marketplace_shared::OrderSnapshot;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Failure reported by a collaborator. `retryable` tells the engine whether a
/// later attempt could succeed.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
    pub retryable: bool,
}

impl CollaboratorError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn reserve(&self, order_id: Uuid) -> CollaboratorResult<()>;
    async fn allocate(&self, order_id: Uuid) -> CollaboratorResult<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommissionService: Send + Sync {
    async fn bulk_calculate(&self, order_ids: Vec<Uuid>) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(
        &self,
        target: &str,
        template: &str,
        context: &serde_json::Value,
    ) -> CollaboratorResult<()>;
}

/// Source of the order snapshot used when evaluating transition conditions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn fetch(&self, order_id: Uuid) -> CollaboratorResult<Option<OrderSnapshot>>;
}
