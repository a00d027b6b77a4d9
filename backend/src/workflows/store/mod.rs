//! Workflow persistence.
//!
//! `WorkflowStore` is the only way the engine and the sweeps touch workflow
//! rows. Mutations go through [`LockedWorkflow`], an exclusive handle on one
//! row that stays held until `commit` (or until it is dropped, which rolls
//! every staged write back).

mod memory;
mod postgres;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_shared::{LastError, TransitionLogEntry, Workflow};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("a workflow already exists for order {0}")]
    Duplicate(Uuid),
    #[error("workflow lock already released")]
    Released,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new workflow together with its initialization history entry.
    async fn insert(&self, workflow: &Workflow, entry: &TransitionLogEntry) -> StoreResult<()>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Workflow>>;

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Workflow>>;

    /// Take the exclusive row lock. `None` when the workflow does not exist.
    async fn lock(&self, id: Uuid) -> StoreResult<Option<Box<dyn LockedWorkflow>>>;

    /// History entries ascending by `transitioned_at`, insertion order on ties.
    async fn history(&self, workflow_id: Uuid) -> StoreResult<Vec<TransitionLogEntry>>;

    /// Non-terminal, not yet escalated workflows whose deadline is before `now`.
    async fn sla_breach_candidates(&self, now: DateTime<Utc>) -> StoreResult<Vec<Workflow>>;

    /// Non-terminal workflows with a registered automation.
    async fn automation_candidates(&self) -> StoreResult<Vec<Workflow>>;

    /// Escalated workflows, most urgent priority first.
    async fn escalated(&self) -> StoreResult<Vec<Workflow>>;

    /// Bump `error_count` and set `last_error` in a write of its own. Waits for
    /// the row lock, so it must not be called while holding a handle on `id`.
    async fn record_error(&self, id: Uuid, error: &LastError) -> StoreResult<()>;
}

#[async_trait]
pub trait LockedWorkflow: Send {
    /// The row as read under the lock, or as last staged by `save`.
    fn workflow(&self) -> &Workflow;

    async fn save(&mut self, workflow: &Workflow) -> StoreResult<()>;

    async fn append(&mut self, entry: &TransitionLogEntry) -> StoreResult<()>;

    /// Make staged writes durable and release the lock.
    async fn commit(&mut self) -> StoreResult<()>;
}
