// Transition History - Append-only log entries for realized transitions

use chrono::{DateTime, Utc};
use marketplace_shared::{OrderAction, OrderState, TransitionLogEntry, TransitionTrigger, Workflow};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who and what caused a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionOrigin {
    pub trigger: TransitionTrigger,
    pub triggered_by: Option<Uuid>,
}

impl TransitionOrigin {
    pub fn manual(actor: Option<Uuid>) -> Self {
        Self {
            trigger: TransitionTrigger::Manual,
            triggered_by: actor,
        }
    }

    /// A transition fired by the automation sweep rather than a person.
    pub fn automated(trigger: TransitionTrigger) -> Self {
        Self {
            trigger,
            triggered_by: None,
        }
    }
}

/// The entry written by `initialize_workflow`.
pub fn initialization_entry(workflow: &Workflow, origin: &TransitionOrigin) -> TransitionLogEntry {
    TransitionLogEntry {
        id: Uuid::new_v4(),
        workflow_id: workflow.id,
        from_state: None,
        to_state: workflow.current_state,
        action: None,
        trigger: origin.trigger,
        triggered_by: origin.triggered_by,
        transition_data: serde_json::json!({
            "reason": "INITIALIZE",
            "success": true,
        }),
        transitioned_at: workflow.state_entered_at,
    }
}

/// The entry for a realized `from -> workflow.current_state` transition.
pub fn transition_entry(
    workflow: &Workflow,
    from: OrderState,
    action: OrderAction,
    origin: &TransitionOrigin,
    data: &Value,
    transitioned_at: DateTime<Utc>,
) -> TransitionLogEntry {
    let mut transition_data = Map::new();
    transition_data.insert("success".into(), Value::Bool(true));
    if let Some(reason) = data.get("reason") {
        transition_data.insert("reason".into(), reason.clone());
    }
    if let Some(object) = data.as_object() {
        let context: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| key.as_str() != "reason")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !context.is_empty() {
            transition_data.insert("context".into(), Value::Object(context));
        }
    }

    TransitionLogEntry {
        id: Uuid::new_v4(),
        workflow_id: workflow.id,
        from_state: Some(from),
        to_state: workflow.current_state,
        action: Some(action),
        trigger: origin.trigger,
        triggered_by: origin.triggered_by,
        transition_data: Value::Object(transition_data),
        transitioned_at,
    }
}
