// Automation Job - Fires the follow-up actions registered on workflows

use chrono::{DateTime, Utc};
use marketplace_shared::TransitionTrigger;
use serde_json::json;
use tracing::{debug, info, warn};

use super::scheduler::JobResult;
use crate::workflows::history::TransitionOrigin;
use crate::workflows::WorkflowEngine;

#[derive(Clone)]
pub struct AutomationJob {
    engine: WorkflowEngine,
    max_attempts: u32,
}

#[derive(Debug, Default)]
pub struct AutomationSweepResult {
    pub workflows_checked: i32,
    pub transitions_fired: i32,
    /// Scheduled automations not yet due.
    pub deferred: i32,
    pub failures: i32,
    pub errors: Vec<String>,
}

impl AutomationJob {
    pub fn new(engine: WorkflowEngine, max_attempts: u32) -> Self {
        Self {
            engine,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run(&self) -> JobResult<AutomationSweepResult> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<AutomationSweepResult> {
        let mut result = AutomationSweepResult::default();

        let candidates = self.engine.store().automation_candidates().await?;
        result.workflows_checked = candidates.len() as i32;

        for workflow in candidates {
            let Some(pending) = workflow.automation_config.pending.clone() else {
                continue;
            };

            match pending.trigger {
                TransitionTrigger::Automatic => {}
                TransitionTrigger::Scheduled if pending.due_at <= now => {}
                TransitionTrigger::Scheduled => {
                    result.deferred += 1;
                    continue;
                }
                // Driven by external callbacks.
                TransitionTrigger::EventDriven
                | TransitionTrigger::ApiWebhook
                | TransitionTrigger::Manual => {
                    debug!(
                        "Workflow {} waits for {} via {}",
                        workflow.id,
                        pending.action,
                        pending.trigger.as_str()
                    );
                    continue;
                }
            }

            let data = json!({
                "reason": format!("automation ({})", pending.trigger.as_str()),
            });

            match self
                .engine
                .execute_action_with(
                    workflow.id,
                    pending.action,
                    TransitionOrigin::automated(pending.trigger),
                    data,
                )
                .await
            {
                Ok(_) => result.transitions_fired += 1,
                Err(e) => {
                    result.failures += 1;
                    result.errors.push(format!(
                        "Automation {} on workflow {} failed: {}",
                        pending.action, workflow.id, e
                    ));

                    match self
                        .engine
                        .record_automation_failure(workflow.id, &pending, e.is_retryable(), self.max_attempts)
                        .await
                    {
                        Ok(true) => warn!(
                            "Automation {} on workflow {} will be retried: {}",
                            pending.action, workflow.id, e
                        ),
                        Ok(false) => {}
                        Err(settle_err) => result.errors.push(format!(
                            "Failed to record automation failure on workflow {}: {}",
                            workflow.id, settle_err
                        )),
                    }
                }
            }
        }

        info!(
            "Automation sweep: {} checked, {} fired, {} deferred, {} failed",
            result.workflows_checked, result.transitions_fired, result.deferred, result.failures
        );

        Ok(result)
    }
}
