pub mod connection;
pub mod http;
pub mod message;
pub mod pipeline;
pub mod supervisor;
pub mod testrun;
pub mod worker;

pub use connection::Connection;
pub use message::{ApiFormat, JobRequest, JobResult, TestRunEvent, TestRunRequest};
pub use pipeline::{CommandProcessor, DocumentProcessor, ToolError};
pub use supervisor::{
    Error, JobId, JobInfo, JobState, Launcher, ProcessLauncher, Result, Supervisor,
    SupervisorConfig, TaskLauncher, TestRunOutcome, TestRunReport,
};
pub use worker::WorkerKind;
