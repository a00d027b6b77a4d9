// Workflow Conditions - Predicates guarding transitions

use chrono::{DateTime, Utc};
use marketplace_shared::{OrderSnapshot, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Exists,
}

impl ConditionOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Exists => "exists",
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Dotted path. `order.` and `data.` select the order snapshot and the
    /// caller-supplied data; anything else is read from the workflow itself.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            ConditionOperator::Exists => write!(f, "{} exists", self.field),
            op => write!(f, "{} {} {}", self.field, op.as_str(), self.value),
        }
    }
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Eq, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Ne, value)
    }

    pub fn gt(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Gt, serde_json::json!(value))
    }

    pub fn lt(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Lt, serde_json::json!(value))
    }

    pub fn gte(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Gte, serde_json::json!(value))
    }

    pub fn lte(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Lte, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, ConditionOperator::Exists, Value::Null)
    }
}

/// The three namespaces a condition can read from, serialized once per
/// transition attempt.
pub struct ConditionScope<'a> {
    workflow: Value,
    order: Value,
    data: &'a Value,
}

impl<'a> ConditionScope<'a> {
    pub fn new(workflow: &Workflow, order: &OrderSnapshot, data: &'a Value) -> Self {
        let mut fields = serde_json::to_value(workflow).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut fields {
            map.insert(
                "approvals_complete".into(),
                Value::Bool(workflow.business_rules.approvals_complete()),
            );
        }

        Self {
            workflow: fields,
            order: serde_json::to_value(order).unwrap_or(Value::Null),
            data,
        }
    }

    fn resolve(&self, field: &str) -> Option<&Value> {
        let (root, path) = match field.split_once('.') {
            Some(("order", rest)) => (&self.order, Some(rest)),
            Some(("data", rest)) => (self.data, Some(rest)),
            None if field == "order" => (&self.order, None),
            None if field == "data" => (self.data, None),
            _ => (&self.workflow, Some(field)),
        };

        let Some(path) = path else {
            return Some(root);
        };

        path.split('.').try_fold(root, |current, part| match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    pub fn holds(&self, condition: &Condition) -> bool {
        let actual = self.resolve(&condition.field).filter(|v| !v.is_null());
        let expected = &condition.value;

        match condition.operator {
            ConditionOperator::Exists => actual.is_some(),
            ConditionOperator::Eq => actual.is_some_and(|v| loosely_equal(v, expected)),
            ConditionOperator::Ne => !actual.is_some_and(|v| loosely_equal(v, expected)),
            ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
            ConditionOperator::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::In => match (actual, expected.as_array()) {
                (Some(v), Some(candidates)) => candidates.iter().any(|c| loosely_equal(v, c)),
                _ => false,
            },
        }
    }

    /// All conditions must hold; returns the first one that does not.
    pub fn first_failing<'c>(&self, conditions: &'c [Condition]) -> Option<&'c Condition> {
        conditions.iter().find(|condition| !self.holds(condition))
    }
}

/// Evaluate one condition against a workflow, its order and caller data.
pub fn evaluate(workflow: &Workflow, order: &OrderSnapshot, data: &Value, condition: &Condition) -> bool {
    ConditionScope::new(workflow, order, data).holds(condition)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    // Decimals serialize as strings; let "19.99" equal 19.99.
    if actual.is_number() || expected.is_number() {
        if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
            return a == b;
        }
    }
    false
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;

    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_timestamp(actual), as_timestamp(expected)) {
        return Some(a.cmp(&b));
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Common condition presets for order transitions
pub mod presets {
    use super::*;

    /// Order carries at least one line item
    pub fn has_items() -> Condition {
        Condition::gt("order.item_count", 0.0)
    }

    /// Caller supplied a payment reference
    pub fn payment_reference_supplied() -> Condition {
        Condition::exists("data.payment_reference")
    }

    /// Caller supplied a carrier tracking number
    pub fn tracking_number_supplied() -> Condition {
        Condition::exists("data.tracking_number")
    }

    /// Vendor signed off on the request
    pub fn vendor_approved() -> Condition {
        Condition::equals("data.vendor_approved", serde_json::json!(true))
    }

    /// Every approval named in the business rules has been granted
    pub fn approvals_granted() -> Condition {
        Condition::equals("approvals_complete", serde_json::json!(true))
    }
}
