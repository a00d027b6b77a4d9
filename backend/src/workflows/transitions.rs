// Transition Table - Declarative order lifecycle edges

use marketplace_shared::{OrderAction, OrderState, TransitionTrigger};
use serde::Serialize;
use std::sync::LazyLock;

use super::conditions::{presets, Condition};

/// Follow-up action the automation sweep runs after a workflow enters the
/// rule's target state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AutomationRule {
    pub trigger: TransitionTrigger,
    pub action: OrderAction,
    pub delay_minutes: i64,
}

/// Who is told, and why, when a workflow overstays the rule's target state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EscalationRule {
    pub notify: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRule {
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub allowed_actions: Vec<OrderAction>,
    pub required_conditions: Vec<Condition>,
    pub automation: Option<AutomationRule>,
    pub sla_minutes: Option<i64>,
    pub escalation: Option<EscalationRule>,
}

impl TransitionRule {
    pub fn new(from_state: OrderState, to_state: OrderState, actions: &[OrderAction]) -> Self {
        Self {
            from_state,
            to_state,
            allowed_actions: actions.to_vec(),
            required_conditions: Vec::new(),
            automation: None,
            sla_minutes: None,
            escalation: None,
        }
    }

    pub fn with_sla(mut self, minutes: i64) -> Self {
        self.sla_minutes = Some(minutes);
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.required_conditions.push(condition);
        self
    }

    pub fn automate(mut self, trigger: TransitionTrigger, action: OrderAction, delay_minutes: i64) -> Self {
        self.automation = Some(AutomationRule {
            trigger,
            action,
            delay_minutes,
        });
        self
    }

    pub fn escalate_to(mut self, notify: &str, reason: &str) -> Self {
        self.escalation = Some(EscalationRule {
            notify: notify.to_string(),
            reason: reason.to_string(),
        });
        self
    }

    pub fn allows(&self, action: OrderAction) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// Ordered, immutable set of legal edges. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rules: Vec<TransitionRule>,
}

impl TransitionTable {
    pub fn new(rules: Vec<TransitionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    /// First rule leaving `from` that accepts `action`.
    pub fn find(&self, from: OrderState, action: OrderAction) -> Option<&TransitionRule> {
        self.rules
            .iter()
            .find(|rule| rule.from_state == from && rule.allows(action))
    }

    /// First rule whose target is `to`. Drives the initial SLA and the
    /// automation/escalation metadata of the state a workflow sits in.
    pub fn entering(&self, to: OrderState) -> Option<&TransitionRule> {
        self.rules.iter().find(|rule| rule.to_state == to)
    }

    /// Actions accepted from `from`, in table order and without duplicates.
    pub fn actions_from(&self, from: OrderState) -> Vec<OrderAction> {
        let mut actions = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.from_state == from) {
            for action in &rule.allowed_actions {
                if !actions.contains(action) {
                    actions.push(*action);
                }
            }
        }
        actions
    }
}

static ORDER_LIFECYCLE: LazyLock<TransitionTable> = LazyLock::new(build_order_lifecycle);

/// The marketplace order lifecycle.
pub fn order_lifecycle() -> &'static TransitionTable {
    &ORDER_LIFECYCLE
}

fn build_order_lifecycle() -> TransitionTable {
    use OrderAction as A;
    use OrderState as S;
    use TransitionTrigger as T;

    let mut rules = vec![
        TransitionRule::new(S::Draft, S::Pending, &[A::SubmitOrder])
            .when(presets::has_items())
            .with_sla(5)
            .escalate_to("customer_support", "Submitted order was not sent to payment"),
        TransitionRule::new(S::Pending, S::Draft, &[A::ReturnToDraft]),
        TransitionRule::new(S::Pending, S::PaymentPending, &[A::InitiatePayment])
            .with_sla(30)
            .escalate_to("payments", "Payment was not settled in time"),
        TransitionRule::new(S::PaymentPending, S::PaymentConfirmed, &[A::ConfirmPayment])
            .when(presets::payment_reference_supplied())
            .with_sla(15)
            .automate(T::Automatic, A::ReserveInventory, 0),
        TransitionRule::new(S::PaymentPending, S::PaymentFailed, &[A::FailPayment])
            .automate(T::Scheduled, A::CancelOrder, 60),
        TransitionRule::new(S::PaymentFailed, S::PaymentPending, &[A::RetryPayment])
            .with_sla(30),
        TransitionRule::new(S::PaymentConfirmed, S::InventoryReserved, &[A::ReserveInventory])
            .with_sla(120)
            .escalate_to("vendor_ops", "Vendor has not started processing the order"),
        TransitionRule::new(S::InventoryReserved, S::Processing, &[A::ProcessOrder])
            .with_sla(1440)
            .escalate_to("vendor_ops", "Order was not shipped within the handling time"),
        TransitionRule::new(S::Processing, S::Shipped, &[A::ShipOrder])
            .when(presets::tracking_number_supplied())
            .with_sla(10080)
            .automate(T::EventDriven, A::DeliverOrder, 0)
            .escalate_to("logistics", "Shipment has not been delivered"),
        TransitionRule::new(S::Processing, S::OnHold, &[A::HoldOrder])
            .with_sla(2880)
            .escalate_to("vendor_ops", "Order has been on hold too long"),
        TransitionRule::new(S::OnHold, S::Processing, &[A::ResumeOrder])
            .with_sla(1440),
        TransitionRule::new(S::Shipped, S::Delivered, &[A::DeliverOrder])
            .automate(T::Scheduled, A::CompleteOrder, 4320),
        TransitionRule::new(S::Delivered, S::Completed, &[A::CompleteOrder]),
        TransitionRule::new(S::Delivered, S::ReturnRequested, &[A::RequestReturn])
            .with_sla(2880)
            .escalate_to("returns_desk", "Return was not received in time"),
        TransitionRule::new(S::ReturnRequested, S::Returned, &[A::ReceiveReturn])
            .with_sla(1440)
            .automate(T::Automatic, A::RefundOrder, 0),
        TransitionRule::new(S::Returned, S::Refunded, &[A::RefundOrder])
            .when(presets::approvals_granted())
            .with_sla(60)
            .automate(T::Automatic, A::CloseOrder, 0),
        TransitionRule::new(S::Refunded, S::Closed, &[A::CloseOrder]),
    ];

    for from in [
        S::Draft,
        S::Pending,
        S::PaymentPending,
        S::PaymentFailed,
        S::PaymentConfirmed,
        S::InventoryReserved,
    ] {
        rules.push(TransitionRule::new(from, S::Cancelled, &[A::CancelOrder]));
    }

    // Once the vendor has started work, cancelling needs their sign-off.
    for from in [S::Processing, S::OnHold] {
        rules.push(
            TransitionRule::new(from, S::Cancelled, &[A::CancelOrder])
                .when(presets::vendor_approved()),
        );
    }

    TransitionTable::new(rules)
}
