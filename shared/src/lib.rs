use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Points in the order lifecycle.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "order_state", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Draft,
    Pending,
    PaymentPending,
    PaymentFailed,
    PaymentConfirmed,
    InventoryReserved,
    Processing,
    OnHold,
    Shipped,
    Delivered,
    Completed,
    ReturnRequested,
    Returned,
    Refunded,
    Cancelled,
    Closed,
}

impl OrderState {
    pub const ALL: [OrderState; 16] = [
        OrderState::Draft,
        OrderState::Pending,
        OrderState::PaymentPending,
        OrderState::PaymentFailed,
        OrderState::PaymentConfirmed,
        OrderState::InventoryReserved,
        OrderState::Processing,
        OrderState::OnHold,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Completed,
        OrderState::ReturnRequested,
        OrderState::Returned,
        OrderState::Refunded,
        OrderState::Cancelled,
        OrderState::Closed,
    ];

    /// States the sweeps never touch again.
    pub const TERMINAL: [OrderState; 3] = [
        OrderState::Completed,
        OrderState::Cancelled,
        OrderState::Closed,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::PaymentPending => "PAYMENT_PENDING",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
            Self::InventoryReserved => "INVENTORY_RESERVED",
            Self::Processing => "PROCESSING",
            Self::OnHold => "ON_HOLD",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
            Self::ReturnRequested => "RETURN_REQUESTED",
            Self::Returned => "RETURNED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant::new("order state", s))
    }
}

/// Named intents that may move an order between states.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "order_action", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    SubmitOrder,
    ReturnToDraft,
    InitiatePayment,
    ConfirmPayment,
    FailPayment,
    RetryPayment,
    ReserveInventory,
    ProcessOrder,
    HoldOrder,
    ResumeOrder,
    ShipOrder,
    DeliverOrder,
    CompleteOrder,
    RequestReturn,
    ReceiveReturn,
    RefundOrder,
    CloseOrder,
    CancelOrder,
}

impl OrderAction {
    pub const ALL: [OrderAction; 18] = [
        OrderAction::SubmitOrder,
        OrderAction::ReturnToDraft,
        OrderAction::InitiatePayment,
        OrderAction::ConfirmPayment,
        OrderAction::FailPayment,
        OrderAction::RetryPayment,
        OrderAction::ReserveInventory,
        OrderAction::ProcessOrder,
        OrderAction::HoldOrder,
        OrderAction::ResumeOrder,
        OrderAction::ShipOrder,
        OrderAction::DeliverOrder,
        OrderAction::CompleteOrder,
        OrderAction::RequestReturn,
        OrderAction::ReceiveReturn,
        OrderAction::RefundOrder,
        OrderAction::CloseOrder,
        OrderAction::CancelOrder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitOrder => "SUBMIT_ORDER",
            Self::ReturnToDraft => "RETURN_TO_DRAFT",
            Self::InitiatePayment => "INITIATE_PAYMENT",
            Self::ConfirmPayment => "CONFIRM_PAYMENT",
            Self::FailPayment => "FAIL_PAYMENT",
            Self::RetryPayment => "RETRY_PAYMENT",
            Self::ReserveInventory => "RESERVE_INVENTORY",
            Self::ProcessOrder => "PROCESS_ORDER",
            Self::HoldOrder => "HOLD_ORDER",
            Self::ResumeOrder => "RESUME_ORDER",
            Self::ShipOrder => "SHIP_ORDER",
            Self::DeliverOrder => "DELIVER_ORDER",
            Self::CompleteOrder => "COMPLETE_ORDER",
            Self::RequestReturn => "REQUEST_RETURN",
            Self::ReceiveReturn => "RECEIVE_RETURN",
            Self::RefundOrder => "REFUND_ORDER",
            Self::CloseOrder => "CLOSE_ORDER",
            Self::CancelOrder => "CANCEL_ORDER",
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant::new("order action", s))
    }
}

/// Origin of an action.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "transition_trigger", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    #[default]
    Manual,
    Automatic,
    EventDriven,
    ApiWebhook,
    Scheduled,
}

impl TransitionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::EventDriven => "event_driven",
            Self::ApiWebhook => "api_webhook",
            Self::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ===== Workflow records =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRule {
    pub on_state: OrderState,
    pub target: String,
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationTarget {
    pub target: String,
    #[serde(default = "default_escalation_template")]
    pub template: String,
}

fn default_escalation_template() -> String {
    "sla_breach".to_string()
}

/// An automated follow-up registered when a workflow enters a state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAutomation {
    pub action: OrderAction,
    pub trigger: TransitionTrigger,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutomationConfig {
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
    #[serde(default)]
    pub escalations: Vec<EscalationTarget>,
    #[serde(default)]
    pub pending: Option<PendingAutomation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BusinessRules {
    #[serde(default)]
    pub required_approvals: Vec<String>,
    #[serde(default)]
    pub granted_approvals: Vec<String>,
    /// Per-state SLA overrides, in minutes.
    #[serde(default)]
    pub state_timeouts: BTreeMap<OrderState, i64>,
}

impl BusinessRules {
    pub fn approvals_complete(&self) -> bool {
        self.required_approvals
            .iter()
            .all(|required| self.granted_approvals.contains(required))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub state_transition_count: i64,
    #[serde(default)]
    pub time_in_state_seconds: BTreeMap<OrderState, i64>,
    #[serde(default)]
    pub sla_breaches: i64,
    #[serde(default)]
    pub fulfillment_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    PreTransition,
    PostTransition,
    Persistence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastError {
    pub occurred_at: DateTime<Utc>,
    pub action: Option<OrderAction>,
    pub phase: ErrorPhase,
    pub message: String,
    pub retryable: bool,
}

/// Lifecycle record owned 1:1 by an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub current_state: OrderState,
    pub previous_state: Option<OrderState>,
    pub state_entered_at: DateTime<Utc>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub priority: i16,
    pub automation_config: AutomationConfig,
    pub business_rules: BusinessRules,
    pub performance_metrics: PerformanceMetrics,
    pub escalation_required: bool,
    pub escalation_date: Option<DateTime<Utc>>,
    pub escalation_reason: Option<String>,
    pub error_count: i32,
    pub last_error: Option<LastError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub const MIN_PRIORITY: i16 = 1;
    pub const MAX_PRIORITY: i16 = 5;
    pub const DEFAULT_PRIORITY: i16 = 3;

    pub fn sla_breached_at(&self, now: DateTime<Utc>) -> bool {
        self.sla_deadline.is_some_and(|deadline| deadline < now)
    }

    pub fn clear_escalation(&mut self) {
        self.escalation_required = false;
        self.escalation_date = None;
        self.escalation_reason = None;
    }

    pub fn record_error(&mut self, error: LastError) {
        self.error_count += 1;
        self.updated_at = error.occurred_at;
        self.last_error = Some(error);
    }
}

/// Append-only history row. `from_state` is `None` for the initialization entry.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionLogEntry {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_state: Option<OrderState>,
    pub to_state: OrderState,
    pub action: Option<OrderAction>,
    pub trigger: TransitionTrigger,
    pub triggered_by: Option<Uuid>,
    pub transition_data: serde_json::Value,
    pub transitioned_at: DateTime<Utc>,
}

/// Read-only view of the owning order, as needed by transition conditions.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub currency: String,
    pub item_count: i32,
    pub payment_method: Option<String>,
    pub shipping_country: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
