use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use super::render;
use crate::config::SmtpConfig;
use crate::workflows::{CollaboratorError, CollaboratorResult, NotificationChannel};

/// Sends notices over SMTP. Targets are either addresses or role names
/// resolved through the configured role mailboxes.
#[derive(Debug, Clone)]
pub struct EmailNotificationChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
    role_mailboxes: HashMap<String, String>,
}

impl EmailNotificationChannel {
    pub fn new(smtp_config: &SmtpConfig, role_mailboxes: HashMap<String, String>) -> Self {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Self {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
            role_mailboxes,
        }
    }

    fn resolve<'a>(&'a self, target: &'a str) -> Option<&'a str> {
        if target.contains('@') {
            Some(target)
        } else {
            self.role_mailboxes.get(target).map(String::as_str)
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailNotificationChannel {
    async fn notify(&self, target: &str, template: &str, context: &Value) -> CollaboratorResult<()> {
        let address = self
            .resolve(target)
            .ok_or_else(|| CollaboratorError::permanent(format!("no mailbox configured for {}", target)))?;

        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| CollaboratorError::permanent(format!("invalid sender: {}", e)))?;
        let to = address
            .parse::<Mailbox>()
            .map_err(|e| CollaboratorError::permanent(format!("invalid recipient {}: {}", address, e)))?;

        let notice = render(template, context);
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(notice.subject)
            .body(notice.text_body)
            .map_err(|e| CollaboratorError::permanent(format!("could not build message: {}", e)))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", address);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", address, e);
                Err(CollaboratorError {
                    message: e.to_string(),
                    retryable: !e.is_permanent(),
                })
            }
        }
    }
}
