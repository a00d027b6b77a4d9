// Order Workflow Engine
//
// Lifecycle state machine for marketplace orders: a static transition table,
// guarded transitions with pre/post hooks, and an append-only history.

pub mod collaborators;
pub mod conditions;
pub mod engine;
pub mod errors;
pub mod history;
pub mod hooks;
pub mod store;
pub mod transitions;

pub use collaborators::{
    CollaboratorError, CollaboratorResult, CommissionService, InventoryService, NotificationChannel,
    OrderDirectory,
};
pub use conditions::{Condition, ConditionOperator};
pub use engine::{WorkflowEngine, WorkflowOptions};
pub use errors::{WorkflowError, WorkflowResult};
pub use hooks::HookDispatcher;
pub use store::{InMemoryWorkflowStore, PgWorkflowStore, StoreError, WorkflowStore};
pub use transitions::{order_lifecycle, TransitionRule, TransitionTable};
