// Workflow Errors - Failure taxonomy for engine operations

use marketplace_shared::{OrderAction, OrderState};
use thiserror::Error;
use uuid::Uuid;

use super::conditions::{Condition, ConditionOperator};
use super::hooks::HookError;
use super::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error("a workflow already exists for order {0}")]
    AlreadyExists(Uuid),

    #[error("action {action} is not allowed from state {state}")]
    InvalidTransition {
        state: OrderState,
        action: OrderAction,
    },

    #[error("transition condition failed: {field} {operator}")]
    ConditionFailure {
        field: String,
        operator: ConditionOperator,
    },

    #[error("priority must be between 1 and 5, got {0}")]
    InvalidPriority(i16),

    #[error("hook {hook} failed: {message}")]
    HookFailure {
        hook: String,
        message: String,
        retryable: bool,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl WorkflowError {
    pub fn condition_failed(condition: &Condition) -> Self {
        Self::ConditionFailure {
            field: condition.field.clone(),
            operator: condition.operator,
        }
    }

    /// Caller mistakes; these never leave side effects behind.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::InvalidTransition { .. }
                | Self::ConditionFailure { .. }
                | Self::InvalidPriority(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HookFailure { retryable, .. } => *retryable,
            Self::PersistenceFailure(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

impl From<HookError> for WorkflowError {
    fn from(err: HookError) -> Self {
        Self::HookFailure {
            hook: err.hook().to_string(),
            retryable: err.retryable(),
            message: match &err {
                HookError::Collaborator { source, .. } => source.message.clone(),
                HookError::TimedOut { after, .. } => format!("timed out after {:?}", after),
            },
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
