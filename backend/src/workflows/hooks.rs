// Hook Dispatcher - Side effects run around a state transition

use chrono::Utc;
use marketplace_shared::{NotificationRule, OrderAction, OrderState, Workflow};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::collaborators::{
    CollaboratorError, CollaboratorResult, CommissionService, InventoryService, NotificationChannel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Blocking; a failure aborts the transition.
    Pre,
    /// Best-effort; a failure is recorded on the workflow only.
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    ReserveInventory,
    AllocateInventory,
    CalculateCommissions,
    RecordDeliveryMetrics,
    Notify(NotificationRule),
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReserveInventory => "reserve_inventory",
            Self::AllocateInventory => "allocate_inventory",
            Self::CalculateCommissions => "calculate_commissions",
            Self::RecordDeliveryMetrics => "record_delivery_metrics",
            Self::Notify(_) => "notify_state_change",
        }
    }
}

/// Hooks attached to a transition, in execution order.
pub fn hooks_for(
    phase: HookPhase,
    action: OrderAction,
    to_state: OrderState,
    workflow: &Workflow,
) -> Vec<Hook> {
    let mut hooks = Vec::new();

    match phase {
        HookPhase::Pre => {
            if to_state == OrderState::InventoryReserved {
                hooks.push(Hook::ReserveInventory);
            }
            if to_state == OrderState::Processing && action == OrderAction::ProcessOrder {
                hooks.push(Hook::AllocateInventory);
            }
        }
        HookPhase::Post => {
            match to_state {
                OrderState::PaymentConfirmed => hooks.push(Hook::CalculateCommissions),
                OrderState::Delivered => hooks.push(Hook::RecordDeliveryMetrics),
                _ => {}
            }
            hooks.extend(
                workflow
                    .automation_config
                    .notifications
                    .iter()
                    .filter(|rule| rule.on_state == to_state)
                    .cloned()
                    .map(Hook::Notify),
            );
        }
    }

    hooks
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HookError {
    #[error("hook {hook} failed: {source}")]
    Collaborator {
        hook: &'static str,
        source: CollaboratorError,
    },
    #[error("hook {hook} timed out after {after:?}")]
    TimedOut { hook: &'static str, after: Duration },
}

impl HookError {
    pub fn hook(&self) -> &'static str {
        match self {
            Self::Collaborator { hook, .. } | Self::TimedOut { hook, .. } => hook,
        }
    }

    /// Timeouts are always worth another attempt.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Collaborator { source, .. } => source.retryable,
            Self::TimedOut { .. } => true,
        }
    }
}

#[derive(Clone)]
pub struct HookDispatcher {
    inventory: Arc<dyn InventoryService>,
    commissions: Arc<dyn CommissionService>,
    notifications: Arc<dyn NotificationChannel>,
    timeout: Duration,
}

impl HookDispatcher {
    pub fn new(
        inventory: Arc<dyn InventoryService>,
        commissions: Arc<dyn CommissionService>,
        notifications: Arc<dyn NotificationChannel>,
        timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            commissions,
            notifications,
            timeout,
        }
    }

    pub fn notifications(&self) -> Arc<dyn NotificationChannel> {
        self.notifications.clone()
    }

    /// Run pre-transition hooks, stopping at the first failure.
    pub async fn run_pre(
        &self,
        workflow: &mut Workflow,
        action: OrderAction,
        to_state: OrderState,
    ) -> Result<(), HookError> {
        for hook in hooks_for(HookPhase::Pre, action, to_state, workflow) {
            self.execute(&hook, workflow, action).await?;
        }
        Ok(())
    }

    /// Run every post-transition hook and collect the failures.
    pub async fn run_post(&self, workflow: &mut Workflow, action: OrderAction) -> Vec<HookError> {
        let mut failures = Vec::new();
        for hook in hooks_for(HookPhase::Post, action, workflow.current_state, workflow) {
            if let Err(e) = self.execute(&hook, workflow, action).await {
                warn!(
                    "Post-transition hook {} failed for workflow {}: {}",
                    hook.name(),
                    workflow.id,
                    e
                );
                failures.push(e);
            }
        }
        failures
    }

    async fn execute(
        &self,
        hook: &Hook,
        workflow: &mut Workflow,
        action: OrderAction,
    ) -> Result<(), HookError> {
        let order_id = workflow.order_id;
        let name = hook.name();

        match hook {
            Hook::ReserveInventory => self.guarded(name, self.inventory.reserve(order_id)).await,
            Hook::AllocateInventory => self.guarded(name, self.inventory.allocate(order_id)).await,
            Hook::CalculateCommissions => {
                self.guarded(name, self.commissions.bulk_calculate(vec![order_id]))
                    .await
            }
            Hook::RecordDeliveryMetrics => {
                let minutes = (Utc::now() - workflow.created_at).num_minutes();
                workflow.performance_metrics.fulfillment_minutes = Some(minutes);
                info!("Order {} fulfilled in {} minutes", order_id, minutes);
                Ok(())
            }
            Hook::Notify(rule) => {
                let context = serde_json::json!({
                    "workflow_id": workflow.id,
                    "order_id": order_id,
                    "action": action,
                    "from_state": workflow.previous_state,
                    "to_state": workflow.current_state,
                });
                self.guarded(
                    name,
                    self.notifications.notify(&rule.target, &rule.template, &context),
                )
                .await
            }
        }
    }

    async fn guarded<F>(&self, hook: &'static str, call: F) -> Result<(), HookError>
    where
        F: Future<Output = CollaboratorResult<()>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HookError::Collaborator { hook, source }),
            Err(_) => Err(HookError::TimedOut {
                hook,
                after: self.timeout,
            }),
        }
    }
}
