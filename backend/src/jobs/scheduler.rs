// Job Scheduler - Central scheduler for the workflow sweeps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::{AutomationJob, SlaMonitorJob};
use crate::workflows::{StoreError, WorkflowEngine};

pub const SLA_MONITOR: &str = "sla_monitor";
pub const AUTOMATION: &str = "automation";

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub sla_check_interval_minutes: u32,
    pub automation_interval_minutes: u32,
    pub max_automation_attempts: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            // SLA - Check every 5 minutes
            sla_check_interval_minutes: 5,
            automation_interval_minutes: 1,
            max_automation_attempts: 3,
        }
    }
}

impl JobConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sla_check_interval_minutes: env::var("SLA_CHECK_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sla_check_interval_minutes),
            automation_interval_minutes: env::var("AUTOMATION_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.automation_interval_minutes),
            max_automation_attempts: env::var("MAX_AUTOMATION_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_automation_attempts),
        }
    }

    fn validate(&self) -> JobResult<()> {
        for (name, minutes) in [
            ("sla_check_interval_minutes", self.sla_check_interval_minutes),
            ("automation_interval_minutes", self.automation_interval_minutes),
        ] {
            if minutes == 0 || minutes > 59 {
                return Err(JobError::ConfigError(format!(
                    "{} must be between 1 and 59, got {}",
                    name, minutes
                )));
            }
        }
        Ok(())
    }
}

/// Every N minutes, on the minute.
fn every_minutes(interval: u32) -> String {
    format!("0 */{} * * * *", interval)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

async fn push_log(logs: &ExecutionLogs, log: JobExecutionLog) {
    let mut logs = logs.write().await;
    logs.push(log);
    // Keep only last 100 logs
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}

async fn run_sla_monitor(job: &SlaMonitorJob, logs: &ExecutionLogs) -> JobResult<()> {
    let started_at = Utc::now();
    info!("Running SLA monitor job");

    match job.run().await {
        Ok(result) => {
            let completed_at = Utc::now();
            push_log(
                logs,
                JobExecutionLog {
                    id: Uuid::new_v4(),
                    job_name: "SLA Monitor".to_string(),
                    started_at,
                    completed_at: Some(completed_at),
                    status: if result.errors.is_empty() { JobStatus::Completed } else { JobStatus::PartialFailure },
                    items_processed: result.workflows_checked,
                    errors: result.errors,
                    duration_ms: Some((completed_at - started_at).num_milliseconds()),
                },
            )
            .await;
            Ok(())
        }
        Err(e) => {
            error!("SLA monitor failed: {}", e);
            push_log(logs, failed_log("SLA Monitor", started_at, &e)).await;
            Err(e)
        }
    }
}

async fn run_automation(job: &AutomationJob, logs: &ExecutionLogs) -> JobResult<()> {
    let started_at = Utc::now();
    info!("Running automation job");

    match job.run().await {
        Ok(result) => {
            let completed_at = Utc::now();
            push_log(
                logs,
                JobExecutionLog {
                    id: Uuid::new_v4(),
                    job_name: "Automation".to_string(),
                    started_at,
                    completed_at: Some(completed_at),
                    status: if result.failures == 0 { JobStatus::Completed } else { JobStatus::PartialFailure },
                    items_processed: result.workflows_checked,
                    errors: result.errors,
                    duration_ms: Some((completed_at - started_at).num_milliseconds()),
                },
            )
            .await;
            Ok(())
        }
        Err(e) => {
            error!("Automation job failed: {}", e);
            push_log(logs, failed_log("Automation", started_at, &e)).await;
            Err(e)
        }
    }
}

fn failed_log(job_name: &str, started_at: DateTime<Utc>, err: &JobError) -> JobExecutionLog {
    let completed_at = Utc::now();
    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status: JobStatus::Failed,
        items_processed: 0,
        errors: vec![err.to_string()],
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    sla_monitor: SlaMonitorJob,
    automation: AutomationJob,
    config: JobConfig,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(engine: WorkflowEngine, config: JobConfig) -> JobResult<Self> {
        config.validate()?;
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            sla_monitor: SlaMonitorJob::new(engine.clone()),
            automation: AutomationJob::new(engine, config.max_automation_attempts),
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_sla_monitor().await?;
        self.schedule_automation().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_sla_monitor(&self) -> JobResult<()> {
        let interval = self.config.sla_check_interval_minutes;
        let monitor = self.sla_monitor.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(every_minutes(interval).as_str(), move |_uuid, _lock| {
            let monitor = monitor.clone();
            let logs = logs.clone();

            Box::pin(async move {
                if let Err(e) = run_sla_monitor(&monitor, &logs).await {
                    error!("Scheduled SLA monitor run failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled SLA monitor to run every {} minutes", interval);

        Ok(())
    }

    async fn schedule_automation(&self) -> JobResult<()> {
        let interval = self.config.automation_interval_minutes;
        let automation = self.automation.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(every_minutes(interval).as_str(), move |_uuid, _lock| {
            let automation = automation.clone();
            let logs = logs.clone();

            Box::pin(async move {
                if let Err(e) = run_automation(&automation, &logs).await {
                    error!("Scheduled automation run failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled automation sweep to run every {} minutes", interval);

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<()> {
        match job_name {
            SLA_MONITOR => run_sla_monitor(&self.sla_monitor, &self.execution_logs).await,
            AUTOMATION => run_automation(&self.automation, &self.execution_logs).await,
            _ => Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }
    }
}
