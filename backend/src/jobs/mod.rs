// Background Jobs
//
// Periodic workflow sweeps, scheduled with tokio-cron-scheduler. Each sweep
// can also be run directly through its `run()` method.

pub mod automation;
pub mod scheduler;
pub mod sla_monitor;

pub use automation::{AutomationJob, AutomationSweepResult};
pub use scheduler::{JobConfig, JobError, JobResult, JobScheduler};
pub use sla_monitor::{SlaMonitorJob, SlaSweepResult};
