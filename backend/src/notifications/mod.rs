// Notification Channels - Delivery of state-change and escalation notices

pub mod email;

pub use email::EmailNotificationChannel;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::workflows::{CollaboratorResult, NotificationChannel};

/// Rendered notice, independent of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotice {
    pub subject: String,
    pub text_body: String,
}

fn context_str<'a>(context: &'a Value, key: &str) -> &'a str {
    context.get(key).and_then(Value::as_str).unwrap_or("unknown")
}

/// Turn a template name and its context into a subject and body.
pub fn render(template: &str, context: &Value) -> RenderedNotice {
    let order_id = context_str(context, "order_id");

    match template {
        "sla_breach" => RenderedNotice {
            subject: format!("SLA breach on order {}", order_id),
            text_body: format!(
                "Order {} missed its deadline in state {} (deadline {}).\nReason: {}\nPriority: {}",
                order_id,
                context_str(context, "state"),
                context_str(context, "sla_deadline"),
                context_str(context, "reason"),
                context.get("priority").map(|p| p.to_string()).unwrap_or_default(),
            ),
        },
        _ => RenderedNotice {
            subject: format!("Order {} is now {}", order_id, context_str(context, "to_state")),
            text_body: format!(
                "Order {} moved from {} to {} ({}).",
                order_id,
                context_str(context, "from_state"),
                context_str(context, "to_state"),
                context_str(context, "action"),
            ),
        },
    }
}

/// Writes notices to the log. Used when SMTP is not configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn notify(&self, target: &str, template: &str, context: &Value) -> CollaboratorResult<()> {
        let notice = render(template, context);
        info!("Notification to {} [{}]: {}", target, template, notice.subject);
        Ok(())
    }
}
