use std::time::Duration;

/// Errors from submitting jobs to [super::Supervisor]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to message supervisor task")]
    FailedToMessageSupervisor,

    #[error("Failed to receive response from supervisor task - {0}")]
    FailedToReceiveResponse(#[from] tokio::sync::oneshot::error::RecvError),

    #[error("Failed to launch worker - {0}")]
    Launch(std::io::Error),

    #[error("Transport error - {0}")]
    Transport(#[from] std::io::Error),

    #[error("Worker exited before sending a result")]
    WorkerExited,

    #[error("Job did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Supervisor is shutting down")]
    Shutdown,

    #[error("Received outcome for a different kind of job")]
    UnexpectedOutcome,
}
