// Scenario tests for the workflow engine over the in-memory store

use chrono::{Duration, Utc};
use marketplace_shared::{
    BusinessRules, ErrorPhase, NotificationRule, OrderAction, OrderState, TransitionTrigger,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::tests::fixtures::{
    self, CommittedStateNotifier, FailingCommitStore, FlakyInventory, RecordingCommissions,
    RecordingNotifier, StalledInventory, StaticOrders,
};
use crate::tests::{hooks_with, TestContext};
use crate::workflows::collaborators::MockOrderDirectory;
use crate::workflows::{
    CollaboratorError, InMemoryWorkflowStore, StoreError, WorkflowEngine, WorkflowError,
    WorkflowOptions,
};

// ============================================
// Initialization
// ============================================

#[cfg(test)]
mod initialization_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_writes_single_history_entry() {
        let ctx = TestContext::new();
        let (order, workflow) = ctx.start(OrderState::Draft).await;

        assert_eq!(workflow.order_id, order.id);
        assert_eq!(workflow.current_state, OrderState::Draft);
        assert_eq!(workflow.priority, 3);
        // Nothing in the table targets DRAFT with an SLA.
        assert!(workflow.sla_deadline.is_none());

        let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].from_state.is_none());
        assert_eq!(history[0].to_state, OrderState::Draft);
        assert!(history[0].action.is_none());
        assert_eq!(history[0].transition_data["reason"], "INITIALIZE");
    }

    #[tokio::test]
    async fn test_initial_sla_follows_entering_rule() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::PaymentPending).await;

        assert_eq!(
            workflow.sla_deadline,
            Some(workflow.state_entered_at + Duration::minutes(30))
        );
    }

    #[tokio::test]
    async fn test_initial_state_registers_automation() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::PaymentConfirmed).await;

        let pending = workflow.automation_config.pending.unwrap();
        assert_eq!(pending.action, OrderAction::ReserveInventory);
        assert_eq!(pending.trigger, TransitionTrigger::Automatic);
        assert_eq!(pending.attempts, 0);
    }

    #[tokio::test]
    async fn test_second_workflow_for_order_is_rejected() {
        let ctx = TestContext::new();
        let (order, _) = ctx.start(OrderState::Draft).await;

        let err = ctx.engine.initialize_workflow(&order, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyExists(id) if id == order.id));
    }

    #[tokio::test]
    async fn test_out_of_range_priority_is_rejected() {
        let ctx = TestContext::new();
        let order = fixtures::order();

        let err = ctx
            .engine
            .initialize_workflow_with(
                &order,
                WorkflowOptions {
                    priority: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPriority(9)));
        assert!(ctx.engine.get_workflow_by_order_id(order.id).await.is_err());
    }
}

// ============================================
// Transitions
// ============================================

#[cfg(test)]
mod transition_tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_order_sets_five_minute_sla() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Draft).await;

        let workflow = ctx
            .engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap();

        assert_eq!(workflow.current_state, OrderState::Pending);
        assert_eq!(workflow.previous_state, Some(OrderState::Draft));
        assert_eq!(
            workflow.sla_deadline,
            Some(workflow.state_entered_at + Duration::minutes(5))
        );
        assert_eq!(workflow.performance_metrics.state_transition_count, 1);
    }

    #[tokio::test]
    async fn test_state_timeout_overrides_table_sla() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx
            .start_with(WorkflowOptions {
                business_rules: BusinessRules {
                    state_timeouts: BTreeMap::from([(OrderState::Pending, 45)]),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        let workflow = ctx
            .advance(workflow.id, &[(OrderAction::SubmitOrder, json!({}))])
            .await;
        assert_eq!(
            workflow.sla_deadline,
            Some(workflow.state_entered_at + Duration::minutes(45))
        );
    }

    #[tokio::test]
    async fn test_every_absent_pair_is_invalid_and_leaves_no_trace() {
        let ctx = TestContext::new();
        let table = ctx.engine.table();

        for state in [OrderState::Draft, OrderState::Processing, OrderState::Completed] {
            let (_, workflow) = ctx.start(state).await;
            for action in OrderAction::ALL {
                if table.find(state, action).is_some() {
                    continue;
                }
                let err = ctx
                    .engine
                    .execute_action(workflow.id, action, None, json!({}))
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, WorkflowError::InvalidTransition { .. }),
                    "{} from {} should be invalid",
                    action,
                    state
                );
            }

            let stored = ctx.engine.get_workflow(workflow.id).await.unwrap();
            assert_eq!(stored, workflow);
            let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
            assert_eq!(history.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failing_condition_changes_nothing() {
        let ctx = TestContext::new();
        let order = fixtures::empty_order();
        ctx.orders.insert(order.clone());
        let workflow = ctx.engine.initialize_workflow(&order, None).await.unwrap();

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "transition condition failed: order.item_count gt");
        let stored = ctx.engine.get_workflow(workflow.id).await.unwrap();
        assert_eq!(stored.current_state, OrderState::Draft);
        assert_eq!(stored.error_count, 0);
        assert_eq!(ctx.engine.get_workflow_history(workflow.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_condition_reads_action_data() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::PaymentPending).await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::ConfirmPayment, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ConditionFailure { .. }));

        let workflow = ctx
            .engine
            .execute_action(
                workflow.id,
                OrderAction::ConfirmPayment,
                None,
                json!({ "payment_reference": "pi_3NkQ" }),
            )
            .await
            .unwrap();
        assert_eq!(workflow.current_state, OrderState::PaymentConfirmed);
    }

    #[tokio::test]
    async fn test_missing_order_reports_not_found() {
        let ctx = TestContext::new();
        let order = fixtures::order();
        // Never registered with the directory.
        let workflow = ctx.engine.initialize_workflow(&order, None).await.unwrap();

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(id) if id == order.id));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let ctx = TestContext::new();
        let id = Uuid::new_v4();

        let err = ctx
            .engine
            .execute_action(id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(missing) if missing == id));
        assert!(ctx.engine.get_workflow_history(id).await.is_err());
    }

    #[tokio::test]
    async fn test_history_entry_carries_actor_and_context() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::PaymentPending).await;
        let actor = Uuid::new_v4();

        ctx.engine
            .execute_action(
                workflow.id,
                OrderAction::ConfirmPayment,
                Some(actor),
                json!({ "payment_reference": "pi_3NkQ", "reason": "gateway callback" }),
            )
            .await
            .unwrap();

        let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
        let entry = history.last().unwrap();
        assert_eq!(entry.from_state, Some(OrderState::PaymentPending));
        assert_eq!(entry.to_state, OrderState::PaymentConfirmed);
        assert_eq!(entry.action, Some(OrderAction::ConfirmPayment));
        assert_eq!(entry.trigger, TransitionTrigger::Manual);
        assert_eq!(entry.triggered_by, Some(actor));
        assert_eq!(entry.transition_data["success"], true);
        assert_eq!(entry.transition_data["reason"], "gateway callback");
        assert_eq!(entry.transition_data["context"]["payment_reference"], "pi_3NkQ");
    }

    #[tokio::test]
    async fn test_time_in_state_accumulates() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Draft).await;
        ctx.edit(workflow.id, |w| w.state_entered_at = Utc::now() - Duration::seconds(90))
            .await;

        let workflow = ctx
            .advance(workflow.id, &[(OrderAction::SubmitOrder, json!({}))])
            .await;
        let spent = workflow.performance_metrics.time_in_state_seconds[&OrderState::Draft];
        assert!(spent >= 90, "spent {}", spent);
    }

    #[tokio::test]
    async fn test_transition_clears_escalation() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Pending).await;
        ctx.edit(workflow.id, |w| {
            w.escalation_required = true;
            w.escalation_date = Some(Utc::now());
            w.escalation_reason = Some("stuck".into());
        })
        .await;

        let workflow = ctx
            .advance(workflow.id, &[(OrderAction::InitiatePayment, json!({}))])
            .await;
        assert!(!workflow.escalation_required);
        assert!(workflow.escalation_date.is_none());
        assert!(workflow.escalation_reason.is_none());
    }

    #[tokio::test]
    async fn test_full_happy_path_to_completion() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Draft).await;

        let workflow = ctx
            .advance(
                workflow.id,
                &[
                    (OrderAction::SubmitOrder, json!({})),
                    (OrderAction::InitiatePayment, json!({})),
                    (OrderAction::ConfirmPayment, json!({ "payment_reference": "pi_1" })),
                    (OrderAction::ReserveInventory, json!({})),
                    (OrderAction::ProcessOrder, json!({})),
                    (OrderAction::ShipOrder, json!({ "tracking_number": "1Z999" })),
                    (OrderAction::DeliverOrder, json!({})),
                    (OrderAction::CompleteOrder, json!({})),
                ],
            )
            .await;

        assert_eq!(workflow.current_state, OrderState::Completed);
        assert!(workflow.sla_deadline.is_none());
        assert!(workflow.automation_config.pending.is_none());
        assert!(workflow.performance_metrics.fulfillment_minutes.is_some());
        assert!(ctx.engine.available_actions(workflow.id).await.unwrap().is_empty());

        let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
        let path: Vec<OrderState> = history.iter().map(|entry| entry.to_state).collect();
        assert_eq!(path.len(), 9);
        assert_eq!(path.first(), Some(&OrderState::Draft));
        assert_eq!(path.last(), Some(&OrderState::Completed));
    }

    #[tokio::test]
    async fn test_refund_waits_for_required_approvals() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx
            .start_with(WorkflowOptions {
                initial_state: Some(OrderState::Returned),
                business_rules: BusinessRules {
                    required_approvals: vec!["finance".into()],
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::RefundOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ConditionFailure { .. }));

        ctx.edit(workflow.id, |w| w.business_rules.granted_approvals.push("finance".into()))
            .await;
        let workflow = ctx
            .advance(workflow.id, &[(OrderAction::RefundOrder, json!({}))])
            .await;
        assert_eq!(workflow.current_state, OrderState::Refunded);
    }

    #[tokio::test]
    async fn test_cancel_after_processing_needs_vendor_approval() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Processing).await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::CancelOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        let workflow = ctx
            .advance(
                workflow.id,
                &[(OrderAction::CancelOrder, json!({ "vendor_approved": true }))],
            )
            .await;
        assert_eq!(workflow.current_state, OrderState::Cancelled);
    }

    #[tokio::test]
    async fn test_caller_data_cannot_set_trigger() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Pending).await;
        let actor = Uuid::new_v4();

        ctx.engine
            .execute_action(
                workflow.id,
                OrderAction::InitiatePayment,
                Some(actor),
                json!({ "trigger": "automatic" }),
            )
            .await
            .unwrap();

        let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
        let entry = history.last().unwrap();
        assert_eq!(entry.trigger, TransitionTrigger::Manual);
        assert_eq!(entry.triggered_by, Some(actor));
        assert_eq!(entry.transition_data["context"]["trigger"], "automatic");
    }

    #[tokio::test]
    async fn test_state_change_notification_is_sent() {
        let ctx = TestContext::new();
        let mut automation_config = marketplace_shared::AutomationConfig::default();
        automation_config.notifications.push(NotificationRule {
            on_state: OrderState::Pending,
            target: "buyer@example.com".into(),
            template: "order_submitted".into(),
        });
        let (order, workflow) = ctx
            .start_with(WorkflowOptions {
                automation_config,
                ..Default::default()
            })
            .await;

        ctx.advance(workflow.id, &[(OrderAction::SubmitOrder, json!({}))])
            .await;

        let sent = ctx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "buyer@example.com");
        assert_eq!(sent[0].template, "order_submitted");
        assert_eq!(sent[0].context["order_id"], json!(order.id));
        assert_eq!(sent[0].context["to_state"], "PENDING");
    }
}

// ============================================
// Hook failures
// ============================================

#[cfg(test)]
mod hook_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_pre_hook_failure_aborts_and_records_error() {
        let inventory = Arc::new(FlakyInventory::failing(
            1,
            CollaboratorError::retryable("warehouse API unavailable"),
        ));
        let ctx = TestContext::with_inventory(inventory.clone());
        let (_, workflow) = ctx.start(OrderState::PaymentConfirmed).await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::ReserveInventory, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::HookFailure { .. }));
        assert!(err.is_retryable());
        assert_eq!(inventory.calls(), 1);

        let stored = ctx.engine.get_workflow(workflow.id).await.unwrap();
        assert_eq!(stored.current_state, OrderState::PaymentConfirmed);
        assert_eq!(stored.error_count, 1);
        let last_error = stored.last_error.unwrap();
        assert_eq!(last_error.phase, ErrorPhase::PreTransition);
        assert_eq!(last_error.action, Some(OrderAction::ReserveInventory));
        assert!(last_error.retryable);
        assert_eq!(ctx.engine.get_workflow_history(workflow.id).await.unwrap().len(), 1);

        // The collaborator recovers; the same call now goes through.
        let workflow = ctx
            .advance(workflow.id, &[(OrderAction::ReserveInventory, json!({}))])
            .await;
        assert_eq!(workflow.current_state, OrderState::InventoryReserved);
    }

    #[tokio::test]
    async fn test_permanent_pre_hook_failure_is_not_retryable() {
        let ctx = TestContext::with_inventory(Arc::new(FlakyInventory::failing(
            1,
            CollaboratorError::permanent("sku discontinued"),
        )));
        let (_, workflow) = ctx.start(OrderState::InventoryReserved).await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::ProcessOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_stalled_hook_times_out_as_retryable() {
        let ctx = TestContext::with_inventory(Arc::new(StalledInventory));
        let (_, workflow) = ctx.start(OrderState::PaymentConfirmed).await;

        let err = ctx
            .engine
            .execute_action(workflow.id, OrderAction::ReserveInventory, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(&err, WorkflowError::HookFailure { hook, .. } if hook == "reserve_inventory"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_post_hook_failure_keeps_transition() {
        let commissions = Arc::new(RecordingCommissions::failing());
        let ctx = TestContext::build(
            Arc::new(FlakyInventory::healthy()),
            commissions,
            Arc::new(RecordingNotifier::default()),
        );
        let (_, workflow) = ctx.start(OrderState::PaymentPending).await;

        let workflow = ctx
            .advance(
                workflow.id,
                &[(OrderAction::ConfirmPayment, json!({ "payment_reference": "pi_1" }))],
            )
            .await;

        assert_eq!(workflow.current_state, OrderState::PaymentConfirmed);
        assert_eq!(workflow.error_count, 1);
        assert_eq!(workflow.last_error.unwrap().phase, ErrorPhase::PostTransition);
        assert_eq!(ctx.engine.get_workflow_history(workflow.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commissions_calculated_on_payment_confirmation() {
        let commissions = Arc::new(RecordingCommissions::default());
        let ctx = TestContext::build(
            Arc::new(FlakyInventory::healthy()),
            commissions.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        let (order, workflow) = ctx.start(OrderState::PaymentPending).await;

        ctx.advance(
            workflow.id,
            &[(OrderAction::ConfirmPayment, json!({ "payment_reference": "pi_1" }))],
        )
        .await;
        assert_eq!(commissions.calculated(), vec![order.id]);
    }

    #[tokio::test]
    async fn test_order_lookup_failure_is_recorded() {
        let mut directory = MockOrderDirectory::new();
        directory
            .expect_fetch()
            .times(1)
            .returning(|_| Err(CollaboratorError::retryable("order db down")));
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            Arc::new(directory),
            hooks_with(Arc::new(RecordingNotifier::default())),
        );
        let workflow = engine.initialize_workflow(&fixtures::order(), None).await.unwrap();

        let err = engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(&err, WorkflowError::HookFailure { hook, retryable: true, .. } if hook == "load_order"));

        let stored = engine.get_workflow(workflow.id).await.unwrap();
        assert_eq!(stored.current_state, OrderState::Draft);
        assert_eq!(stored.error_count, 1);
        let last_error = stored.last_error.unwrap();
        assert_eq!(last_error.phase, ErrorPhase::PreTransition);
        assert_eq!(last_error.action, Some(OrderAction::SubmitOrder));
        assert!(last_error.retryable);
        assert_eq!(engine.get_workflow_history(workflow.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_post_hooks_observe_committed_state() {
        let store = InMemoryWorkflowStore::new();
        let notifier = Arc::new(CommittedStateNotifier::new(store.clone()));
        let order = fixtures::order();
        let engine = WorkflowEngine::new(
            Arc::new(store),
            Arc::new(StaticOrders::with(&[order.clone()])),
            hooks_with(notifier.clone()),
        );
        let mut automation_config = marketplace_shared::AutomationConfig::default();
        automation_config.notifications.push(NotificationRule {
            on_state: OrderState::Pending,
            target: "buyer@example.com".into(),
            template: "order_submitted".into(),
        });
        let workflow = engine
            .initialize_workflow_with(
                &order,
                WorkflowOptions {
                    automation_config,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap();

        assert_eq!(notifier.seen(), vec![Some(OrderState::Pending)]);
    }
}

// ============================================
// Persistence failures
// ============================================

#[cfg(test)]
mod persistence_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_commit_rolls_back_and_records_error() {
        let store = Arc::new(FailingCommitStore::new(InMemoryWorkflowStore::new()));
        let order = fixtures::order();
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(StaticOrders::with(&[order.clone()])),
            hooks_with(Arc::new(RecordingNotifier::default())),
        );
        let workflow = engine.initialize_workflow(&order, None).await.unwrap();

        store.fail_commits(true);
        let err = engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PersistenceFailure(StoreError::Database(_))));
        assert!(err.is_retryable());

        let stored = engine.get_workflow(workflow.id).await.unwrap();
        assert_eq!(stored.current_state, OrderState::Draft);
        assert_eq!(stored.performance_metrics.state_transition_count, 0);
        assert_eq!(stored.error_count, 1);
        let last_error = stored.last_error.unwrap();
        assert_eq!(last_error.phase, ErrorPhase::Persistence);
        assert_eq!(last_error.action, Some(OrderAction::SubmitOrder));
        assert_eq!(engine.get_workflow_history(workflow.id).await.unwrap().len(), 1);

        store.fail_commits(false);
        let workflow = engine
            .execute_action(workflow.id, OrderAction::SubmitOrder, None, json!({}))
            .await
            .unwrap();
        assert_eq!(workflow.current_state, OrderState::Pending);
        assert_eq!(engine.get_workflow_history(workflow.id).await.unwrap().len(), 2);
    }
}

// ============================================
// Locking
// ============================================

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_actions_are_serialized() {
        for _ in 0..20 {
            let ctx = TestContext::new();
            let (_, workflow) = ctx.start(OrderState::Pending).await;
            let id = workflow.id;

            let pay = {
                let engine = ctx.engine.clone();
                tokio::spawn(async move {
                    engine
                        .execute_action(id, OrderAction::InitiatePayment, None, json!({}))
                        .await
                })
            };
            let back = {
                let engine = ctx.engine.clone();
                tokio::spawn(async move {
                    engine
                        .execute_action(id, OrderAction::ReturnToDraft, None, json!({}))
                        .await
                })
            };
            let (pay, back) = (pay.await.unwrap(), back.await.unwrap());

            // The loser sees the winner's state and has no edge from it.
            assert!(pay.is_ok() != back.is_ok());
            let stored = ctx.engine.get_workflow(workflow.id).await.unwrap();
            assert!(matches!(
                stored.current_state,
                OrderState::PaymentPending | OrderState::Draft
            ));

            let history = ctx.engine.get_workflow_history(workflow.id).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[1].to_state, stored.current_state);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_history_is_ordered_and_isolated() {
        let ctx = TestContext::new();
        let (_, first) = ctx.start(OrderState::Draft).await;
        let (_, second) = ctx.start(OrderState::Draft).await;

        let steps = [
            (OrderAction::SubmitOrder, json!({})),
            (OrderAction::ReturnToDraft, json!({})),
            (OrderAction::SubmitOrder, json!({})),
            (OrderAction::InitiatePayment, json!({})),
        ];
        let (a, b) = tokio::join!(ctx.advance(first.id, &steps), ctx.advance(second.id, &steps[..2]));
        assert_eq!(a.current_state, OrderState::PaymentPending);
        assert_eq!(b.current_state, OrderState::Draft);

        let history = ctx.engine.get_workflow_history(first.id).await.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|e| e.workflow_id == first.id));
        assert!(history
            .windows(2)
            .all(|pair| pair[0].transitioned_at <= pair[1].transitioned_at));
        assert_eq!(ctx.engine.get_workflow_history(second.id).await.unwrap().len(), 3);
    }
}

// ============================================
// Operator controls
// ============================================

#[cfg(test)]
mod operator_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_priority_bounds() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Draft).await;

        assert_eq!(ctx.engine.set_priority(workflow.id, 1).await.unwrap().priority, 1);
        assert_eq!(ctx.engine.set_priority(workflow.id, 5).await.unwrap().priority, 5);
        assert!(matches!(
            ctx.engine.set_priority(workflow.id, 0).await,
            Err(WorkflowError::InvalidPriority(0))
        ));
        assert!(matches!(
            ctx.engine.set_priority(workflow.id, 6).await,
            Err(WorkflowError::InvalidPriority(6))
        ));
        assert_eq!(ctx.engine.get_workflow(workflow.id).await.unwrap().priority, 5);
    }

    #[tokio::test]
    async fn test_reset_escalation() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::Pending).await;

        // Not escalated: nothing to do.
        let unchanged = ctx.engine.reset_escalation(workflow.id, None).await.unwrap();
        assert_eq!(unchanged, workflow);

        ctx.edit(workflow.id, |w| {
            w.escalation_required = true;
            w.escalation_reason = Some("stuck".into());
        })
        .await;
        assert_eq!(ctx.engine.escalated_workflows().await.unwrap().len(), 1);

        let reset = ctx
            .engine
            .reset_escalation(workflow.id, Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(!reset.escalation_required);
        assert_eq!(reset.current_state, OrderState::Pending);
        assert!(ctx.engine.escalated_workflows().await.unwrap().is_empty());
        // No transition was logged.
        assert_eq!(ctx.engine.get_workflow_history(workflow.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_available_actions_follow_table_order() {
        let ctx = TestContext::new();
        let (_, workflow) = ctx.start(OrderState::PaymentPending).await;

        assert_eq!(
            ctx.engine.available_actions(workflow.id).await.unwrap(),
            vec![
                OrderAction::ConfirmPayment,
                OrderAction::FailPayment,
                OrderAction::CancelOrder
            ]
        );
    }
}
