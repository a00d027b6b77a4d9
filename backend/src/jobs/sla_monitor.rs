// SLA Monitor Job - Flags workflows that overstayed their state and notifies escalation targets

use chrono::{DateTime, Utc};
use marketplace_shared::{EscalationTarget, Workflow};
use serde_json::json;
use tracing::{error, info};

use super::scheduler::JobResult;
use crate::workflows::WorkflowEngine;

const BREACH_TEMPLATE: &str = "sla_breach";

#[derive(Clone)]
pub struct SlaMonitorJob {
    engine: WorkflowEngine,
}

#[derive(Debug, Default)]
pub struct SlaSweepResult {
    pub workflows_checked: i32,
    pub breaches_flagged: i32,
    pub notifications_sent: i32,
    pub errors: Vec<String>,
}

impl SlaMonitorJob {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> JobResult<SlaSweepResult> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<SlaSweepResult> {
        let mut result = SlaSweepResult::default();

        let candidates = self.engine.store().sla_breach_candidates(now).await?;
        result.workflows_checked = candidates.len() as i32;

        for candidate in candidates {
            let workflow = match self.engine.flag_sla_breach(candidate.id, now).await {
                Ok(Some(workflow)) => workflow,
                // Moved on or flagged by a concurrent sweep.
                Ok(None) => continue,
                Err(e) => {
                    result
                        .errors
                        .push(format!("Failed to flag SLA breach for workflow {}: {}", candidate.id, e));
                    continue;
                }
            };
            result.breaches_flagged += 1;

            for target in self.escalation_targets(&workflow) {
                let context = json!({
                    "workflow_id": workflow.id,
                    "order_id": workflow.order_id,
                    "state": workflow.current_state,
                    "sla_deadline": workflow.sla_deadline,
                    "priority": workflow.priority,
                    "reason": workflow.escalation_reason,
                });
                match self
                    .engine
                    .hooks()
                    .notifications()
                    .notify(&target.target, &target.template, &context)
                    .await
                {
                    Ok(()) => result.notifications_sent += 1,
                    Err(e) => {
                        error!("Escalation notice to {} failed: {}", target.target, e);
                        result.errors.push(format!(
                            "Failed to notify {} for workflow {}: {}",
                            target.target, workflow.id, e
                        ));
                    }
                }
            }
        }

        info!(
            "SLA sweep: {} checked, {} breaches flagged, {} notifications sent",
            result.workflows_checked, result.breaches_flagged, result.notifications_sent
        );

        Ok(result)
    }

    /// Configured targets first, then the role named by the table for the state.
    fn escalation_targets(&self, workflow: &Workflow) -> Vec<EscalationTarget> {
        let mut targets = workflow.automation_config.escalations.clone();
        if let Some(escalation) = self
            .engine
            .table()
            .entering(workflow.current_state)
            .and_then(|rule| rule.escalation.as_ref())
        {
            if !targets.iter().any(|t| t.target == escalation.notify) {
                targets.push(EscalationTarget {
                    target: escalation.notify.clone(),
                    template: BREACH_TEMPLATE.to_string(),
                });
            }
        }
        targets
    }
}
