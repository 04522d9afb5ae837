// Background Jobs
//
// Scheduled work that runs alongside the API. Jobs are scheduled using
// tokio-cron-scheduler.

pub mod resume_runs;
pub mod scheduler;

pub use resume_runs::{ResumeRunsJob, ResumeRunsResult};
pub use scheduler::{JobConfig, JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus};
