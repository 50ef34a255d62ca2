//! Worker side of a job. A worker serves exactly one job over its connection, then returns.
use tracing::{error, info};

use crate::pipeline::{self, DocumentProcessor, ERROR_PREFIX};
use crate::{testrun, Connection, JobRequest, JobResult};

/// Errors that end a worker without a terminal message
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connection closed before a request was received")]
    ConnectionClosed,

    #[error("Test run worker failed - {0}")]
    TestRun(#[from] testrun::Error),

    #[error("IO Error - {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Kinds of workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Parse,
    TestRun,
}

impl WorkerKind {
    /// Name used on worker command lines
    pub fn as_arg(&self) -> &'static str {
        match self {
            WorkerKind::Parse => "parse",
            WorkerKind::TestRun => "test-run",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_arg())
    }
}

impl std::str::FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "parse" => Ok(WorkerKind::Parse),
            "test-run" => Ok(WorkerKind::TestRun),
            other => Err(format!("Unknown worker kind - {}", other)),
        }
    }
}

/// Serve one parse job. `make_processor` builds the processor for the received request.
pub async fn serve_parse<P, F>(conn: &mut Connection, make_processor: F) -> Result<()>
where
    P: DocumentProcessor,
    F: FnOnce(&JobRequest) -> P,
{
    let req: JobRequest = conn.recv().await.ok_or(Error::ConnectionClosed)??;
    info!("parse job for {} ({})", req.source, req.format);

    let mut processor = make_processor(&req);
    let result = match processor.init().await {
        Ok(()) => pipeline::run(&processor, &req).await,
        Err(e) => {
            error!("processor init failed - {}", e);
            JobResult::Failure {
                error: format!("{}{}", ERROR_PREFIX, e),
            }
        }
    };

    conn.send(&result).await?;
    Ok(())
}

/// Serve one test-run job
pub async fn serve_test_run(conn: &mut Connection) -> Result<()> {
    Ok(testrun::serve(conn).await?)
}
