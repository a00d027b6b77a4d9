// Workflow Engine - Order lifecycle transitions under an exclusive row lock

use chrono::{DateTime, Duration, Utc};
use marketplace_shared::{
    AutomationConfig, BusinessRules, ErrorPhase, LastError, OrderAction, OrderSnapshot, OrderState,
    PendingAutomation, PerformanceMetrics, TransitionLogEntry, Workflow,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::collaborators::OrderDirectory;
use super::conditions::ConditionScope;
use super::errors::{WorkflowError, WorkflowResult};
use super::history::{self, TransitionOrigin};
use super::hooks::HookDispatcher;
use super::store::{LockedWorkflow, StoreError, WorkflowStore};
use super::transitions::{order_lifecycle, TransitionRule, TransitionTable};

/// Optional settings for a new workflow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowOptions {
    pub initial_state: Option<OrderState>,
    pub priority: Option<i16>,
    #[serde(default)]
    pub automation_config: AutomationConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

/// Deadline for leaving `state`. A per-workflow timeout overrides the table.
fn sla_deadline(
    business_rules: &BusinessRules,
    state: OrderState,
    rule: Option<&TransitionRule>,
    entered_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    business_rules
        .state_timeouts
        .get(&state)
        .copied()
        .or_else(|| rule.and_then(|r| r.sla_minutes))
        .map(|minutes| entered_at + Duration::minutes(minutes))
}

fn pending_automation(rule: Option<&TransitionRule>, entered_at: DateTime<Utc>) -> Option<PendingAutomation> {
    rule.and_then(|r| r.automation.as_ref())
        .map(|automation| PendingAutomation {
            action: automation.action,
            trigger: automation.trigger,
            due_at: entered_at + Duration::minutes(automation.delay_minutes),
            attempts: 0,
        })
}

#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    orders: Arc<dyn OrderDirectory>,
    hooks: HookDispatcher,
    table: &'static TransitionTable,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, orders: Arc<dyn OrderDirectory>, hooks: HookDispatcher) -> Self {
        Self::with_table(store, orders, hooks, order_lifecycle())
    }

    pub fn with_table(
        store: Arc<dyn WorkflowStore>,
        orders: Arc<dyn OrderDirectory>,
        hooks: HookDispatcher,
        table: &'static TransitionTable,
    ) -> Self {
        Self {
            store,
            orders,
            hooks,
            table,
        }
    }

    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        self.store.clone()
    }

    pub fn table(&self) -> &'static TransitionTable {
        self.table
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    /// Create the workflow for an order, starting in `initial_state` (DRAFT
    /// when omitted).
    pub async fn initialize_workflow(
        &self,
        order: &OrderSnapshot,
        initial_state: Option<OrderState>,
    ) -> WorkflowResult<Workflow> {
        self.initialize_workflow_with(
            order,
            WorkflowOptions {
                initial_state,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn initialize_workflow_with(
        &self,
        order: &OrderSnapshot,
        options: WorkflowOptions,
    ) -> WorkflowResult<Workflow> {
        let priority = options.priority.unwrap_or(Workflow::DEFAULT_PRIORITY);
        if !(Workflow::MIN_PRIORITY..=Workflow::MAX_PRIORITY).contains(&priority) {
            return Err(WorkflowError::InvalidPriority(priority));
        }

        if self.store.find_by_order(order.id).await?.is_some() {
            return Err(WorkflowError::AlreadyExists(order.id));
        }

        let now = Utc::now();
        let state = options.initial_state.unwrap_or(OrderState::Draft);
        let entering = self.table.entering(state);

        let mut automation_config = options.automation_config;
        automation_config.pending = pending_automation(entering, now);

        let workflow = Workflow {
            id: Uuid::new_v4(),
            order_id: order.id,
            current_state: state,
            previous_state: None,
            state_entered_at: now,
            sla_deadline: sla_deadline(&options.business_rules, state, entering, now),
            priority,
            automation_config,
            business_rules: options.business_rules,
            performance_metrics: PerformanceMetrics::default(),
            escalation_required: false,
            escalation_date: None,
            escalation_reason: None,
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let entry = history::initialization_entry(&workflow, &TransitionOrigin::manual(None));
        match self.store.insert(&workflow, &entry).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(order_id)) => return Err(WorkflowError::AlreadyExists(order_id)),
            Err(e) => return Err(e.into()),
        }

        info!(
            "Initialized workflow {} for order {} in state {}",
            workflow.id, order.id, state
        );

        Ok(workflow)
    }

    /// Apply `action` on behalf of `actor`. The history records a manual
    /// transition whatever `data` carries.
    pub async fn execute_action(
        &self,
        workflow_id: Uuid,
        action: OrderAction,
        actor: Option<Uuid>,
        data: Value,
    ) -> WorkflowResult<Workflow> {
        self.execute_action_with(workflow_id, action, TransitionOrigin::manual(actor), data)
            .await
    }

    /// Apply `action` to a workflow. The only mutation path for state.
    ///
    /// Runs under the workflow's row lock up to the commit of the new state and
    /// its history entry; post-transition hooks run after that. Client errors
    /// leave no trace; hook failures are recorded on the workflow; persistence
    /// failures roll back and are recorded best-effort afterwards.
    pub async fn execute_action_with(
        &self,
        workflow_id: Uuid,
        action: OrderAction,
        origin: TransitionOrigin,
        data: Value,
    ) -> WorkflowResult<Workflow> {
        let workflow = match self.apply_action(workflow_id, action, &origin, &data).await {
            Ok(workflow) => workflow,
            Err(WorkflowError::PersistenceFailure(e)) => {
                error!("Persisting {} on workflow {} failed: {}", action, workflow_id, e);
                let last_error = LastError {
                    occurred_at: Utc::now(),
                    action: Some(action),
                    phase: ErrorPhase::Persistence,
                    message: e.to_string(),
                    retryable: matches!(e, StoreError::Database(_)),
                };
                if let Err(record_err) = self.store.record_error(workflow_id, &last_error).await {
                    warn!(
                        "Could not record persistence failure on workflow {}: {}",
                        workflow_id, record_err
                    );
                }
                return Err(WorkflowError::PersistenceFailure(e));
            }
            Err(e) => return Err(e),
        };

        Ok(self.run_post_hooks(workflow, action).await)
    }

    async fn apply_action(
        &self,
        workflow_id: Uuid,
        action: OrderAction,
        origin: &TransitionOrigin,
        data: &Value,
    ) -> WorkflowResult<Workflow> {
        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();
        let from = workflow.current_state;

        let rule = self
            .table
            .find(from, action)
            .ok_or(WorkflowError::InvalidTransition { state: from, action })?;

        if !rule.required_conditions.is_empty() {
            let order = match self.load_order(workflow.order_id).await {
                Ok(order) => order,
                Err(e @ WorkflowError::HookFailure { .. }) => {
                    error!(
                        "Loading order {} for workflow {} failed: {}",
                        workflow.order_id, workflow_id, e
                    );
                    return Self::abort_pre_transition(locked, action, e).await;
                }
                Err(e) => return Err(e),
            };
            let scope = ConditionScope::new(&workflow, &order, data);
            if let Some(failed) = scope.first_failing(&rule.required_conditions) {
                debug!("Workflow {} blocked by condition {}", workflow_id, failed);
                return Err(WorkflowError::condition_failed(failed));
            }
        }

        if let Err(hook_err) = self.hooks.run_pre(&mut workflow, action, rule.to_state).await {
            error!(
                "Pre-transition hook {} failed for workflow {} ({} -> {}): {}",
                hook_err.hook(),
                workflow_id,
                from,
                rule.to_state,
                hook_err
            );
            return Self::abort_pre_transition(locked, action, hook_err.into()).await;
        }

        let now = Utc::now();
        let spent = (now - workflow.state_entered_at).num_seconds().max(0);
        *workflow
            .performance_metrics
            .time_in_state_seconds
            .entry(from)
            .or_insert(0) += spent;

        workflow.previous_state = Some(from);
        workflow.current_state = rule.to_state;
        workflow.state_entered_at = now;
        workflow.sla_deadline = sla_deadline(&workflow.business_rules, rule.to_state, Some(rule), now);
        workflow.performance_metrics.state_transition_count += 1;
        workflow.clear_escalation();
        workflow.automation_config.pending = pending_automation(Some(rule), now);
        workflow.updated_at = now;

        let entry = history::transition_entry(&workflow, from, action, origin, data, now);
        locked.save(&workflow).await?;
        locked.append(&entry).await?;
        locked.commit().await?;

        info!(
            "Workflow {} transitioned {} -> {} via {} ({})",
            workflow_id,
            from,
            workflow.current_state,
            action,
            origin.trigger.as_str()
        );

        Ok(workflow)
    }

    /// Record a failure that stopped the transition before any state changed.
    async fn abort_pre_transition(
        mut locked: Box<dyn LockedWorkflow>,
        action: OrderAction,
        err: WorkflowError,
    ) -> WorkflowResult<Workflow> {
        let mut failed = locked.workflow().clone();
        failed.record_error(LastError {
            occurred_at: Utc::now(),
            action: Some(action),
            phase: ErrorPhase::PreTransition,
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
        locked.save(&failed).await?;
        locked.commit().await?;
        Err(err)
    }

    /// Post-transition hooks see the committed state. Their failures and the
    /// metrics they produce are written back in a second locked update; the
    /// transition itself stands either way.
    async fn run_post_hooks(&self, mut workflow: Workflow, action: OrderAction) -> Workflow {
        let metrics_before = workflow.performance_metrics.clone();
        let failures = self.hooks.run_post(&mut workflow, action).await;
        if failures.is_empty() && workflow.performance_metrics == metrics_before {
            return workflow;
        }

        let fulfillment_minutes = workflow.performance_metrics.fulfillment_minutes;
        let errors: Vec<LastError> = failures
            .iter()
            .map(|failure| LastError {
                occurred_at: Utc::now(),
                action: Some(action),
                phase: ErrorPhase::PostTransition,
                message: failure.to_string(),
                retryable: failure.retryable(),
            })
            .collect();

        match self.write_back_post_hooks(workflow.id, fulfillment_minutes, errors).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(
                    "Could not record post-transition results on workflow {}: {}",
                    workflow.id, e
                );
                workflow
            }
        }
    }

    async fn write_back_post_hooks(
        &self,
        workflow_id: Uuid,
        fulfillment_minutes: Option<i64>,
        errors: Vec<LastError>,
    ) -> WorkflowResult<Workflow> {
        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();
        if fulfillment_minutes.is_some() {
            workflow.performance_metrics.fulfillment_minutes = fulfillment_minutes;
        }
        for error in errors {
            workflow.record_error(error);
        }
        locked.save(&workflow).await?;
        locked.commit().await?;
        Ok(workflow)
    }

    async fn load_order(&self, order_id: Uuid) -> WorkflowResult<OrderSnapshot> {
        match self.orders.fetch(order_id).await {
            Ok(Some(order)) => Ok(order),
            Ok(None) => Err(WorkflowError::NotFound(order_id)),
            Err(e) => Err(WorkflowError::HookFailure {
                hook: "load_order".to_string(),
                message: e.message,
                retryable: e.retryable,
            }),
        }
    }

    async fn lock(&self, workflow_id: Uuid) -> WorkflowResult<Box<dyn LockedWorkflow>> {
        self.store
            .lock(workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> WorkflowResult<Workflow> {
        self.store
            .find(workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))
    }

    pub async fn get_workflow_by_order_id(&self, order_id: Uuid) -> WorkflowResult<Workflow> {
        self.store
            .find_by_order(order_id)
            .await?
            .ok_or(WorkflowError::NotFound(order_id))
    }

    /// History ascending by `transitioned_at`.
    pub async fn get_workflow_history(&self, workflow_id: Uuid) -> WorkflowResult<Vec<TransitionLogEntry>> {
        self.get_workflow(workflow_id).await?;
        Ok(self.store.history(workflow_id).await?)
    }

    /// Actions the table accepts from the workflow's current state. Conditions
    /// are not evaluated.
    pub async fn available_actions(&self, workflow_id: Uuid) -> WorkflowResult<Vec<OrderAction>> {
        let workflow = self.get_workflow(workflow_id).await?;
        Ok(self.table.actions_from(workflow.current_state))
    }

    pub async fn escalated_workflows(&self) -> WorkflowResult<Vec<Workflow>> {
        Ok(self.store.escalated().await?)
    }

    /// Clear the escalation flag without a transition.
    pub async fn reset_escalation(&self, workflow_id: Uuid, actor: Option<Uuid>) -> WorkflowResult<Workflow> {
        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();
        if !workflow.escalation_required {
            return Ok(workflow);
        }

        workflow.clear_escalation();
        workflow.updated_at = Utc::now();
        locked.save(&workflow).await?;
        locked.commit().await?;

        info!(
            "Escalation on workflow {} reset by {}",
            workflow_id,
            actor.map(|a| a.to_string()).unwrap_or_else(|| "system".to_string())
        );
        Ok(workflow)
    }

    pub async fn set_priority(&self, workflow_id: Uuid, priority: i16) -> WorkflowResult<Workflow> {
        if !(Workflow::MIN_PRIORITY..=Workflow::MAX_PRIORITY).contains(&priority) {
            return Err(WorkflowError::InvalidPriority(priority));
        }

        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();
        workflow.priority = priority;
        workflow.updated_at = Utc::now();
        locked.save(&workflow).await?;
        locked.commit().await?;

        Ok(workflow)
    }

    /// Flag a missed SLA. Returns the escalated workflow, or `None` when the
    /// row no longer qualifies once locked (already flagged, moved on, or
    /// deadline pushed back).
    pub async fn flag_sla_breach(&self, workflow_id: Uuid, now: DateTime<Utc>) -> WorkflowResult<Option<Workflow>> {
        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();

        if workflow.escalation_required
            || workflow.current_state.is_terminal()
            || !workflow.sla_breached_at(now)
        {
            return Ok(None);
        }

        let reason = self
            .table
            .entering(workflow.current_state)
            .and_then(|rule| rule.escalation.as_ref())
            .map(|escalation| escalation.reason.clone())
            .unwrap_or_else(|| format!("SLA deadline missed in {}", workflow.current_state));

        workflow.escalation_required = true;
        workflow.escalation_date = Some(now);
        workflow.escalation_reason = Some(reason);
        workflow.performance_metrics.sla_breaches += 1;
        workflow.updated_at = now;
        locked.save(&workflow).await?;
        locked.commit().await?;

        warn!(
            "Workflow {} breached its SLA in {} (deadline {:?})",
            workflow_id, workflow.current_state, workflow.sla_deadline
        );
        Ok(Some(workflow))
    }

    /// Settle a failed automation attempt. Returns `true` when the automation
    /// stays pending for another sweep, `false` when it was dropped. An
    /// automation that was replaced in the meantime is left untouched.
    pub async fn record_automation_failure(
        &self,
        workflow_id: Uuid,
        attempted: &PendingAutomation,
        retryable: bool,
        max_attempts: u32,
    ) -> WorkflowResult<bool> {
        let mut locked = self.lock(workflow_id).await?;
        let mut workflow = locked.workflow().clone();

        let Some(pending) = workflow.automation_config.pending.as_mut() else {
            return Ok(false);
        };
        if pending.action != attempted.action || pending.due_at != attempted.due_at {
            return Ok(true);
        }

        pending.attempts += 1;
        let keep = retryable && pending.attempts < max_attempts;
        if !keep {
            warn!(
                "Dropping automation {} on workflow {} after {} attempt(s)",
                pending.action, workflow_id, pending.attempts
            );
            workflow.automation_config.pending = None;
        }

        workflow.updated_at = Utc::now();
        locked.save(&workflow).await?;
        locked.commit().await?;
        Ok(keep)
    }
}
