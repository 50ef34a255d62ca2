//! Launching isolated worker units
use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, warn};

use crate::pipeline::DocumentProcessor;
use crate::worker::{self, WorkerKind};
use crate::{Connection, JobRequest};

/// Name of the worker executable
pub const WORKER_PROGRAM: &str = "apiproc-worker";

/// Starts one worker unit per job
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, kind: WorkerKind) -> std::io::Result<Worker>;
}

/// A launched worker and the channel to it
#[derive(Debug)]
pub struct Worker {
    conn: Connection,
    unit: Unit,
}

/// Dropping a unit stops it
#[derive(Debug)]
enum Unit {
    Process(Child),
    Task(AbortOnDropHandle<()>),
}

impl Worker {
    /// Worker running as a subprocess with piped stdin and stdout
    pub fn process(mut child: Child) -> std::io::Result<Self> {
        let conn = Connection::child(&mut child)?;
        Ok(Self {
            conn,
            unit: Unit::Process(child),
        })
    }

    /// Worker running as a task in this process
    pub fn task(conn: Connection, handle: JoinHandle<()>) -> Self {
        Self {
            conn,
            unit: Unit::Task(AbortOnDropHandle::new(handle)),
        }
    }

    pub fn conn(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Close the channel and wait for the unit to finish
    pub async fn reap(self) {
        drop(self.conn);
        match self.unit {
            Unit::Process(mut child) => match child.wait().await {
                Ok(status) if status.success() => debug!("worker exited - {}", status),
                Ok(status) => warn!("worker exited - {}", status),
                Err(e) => error!("Failed to wait on worker - {}", e),
            },
            Unit::Task(handle) => {
                if let Err(e) = handle.await {
                    error!("worker task failed - {}", e);
                }
            }
        }
    }

    /// Stop the unit without waiting for it to finish its job
    pub async fn kill(self) {
        drop(self.conn);
        match self.unit {
            Unit::Process(mut child) => {
                if let Err(e) = child.kill().await {
                    error!("Failed to kill worker - {}", e);
                }
            }
            Unit::Task(handle) => handle.abort(),
        }
    }
}

/// Launches each worker as a subprocess running the worker executable
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    /// Argument passed to every worker ahead of its kind
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The worker executable installed next to the running executable
    pub fn default_program() -> std::io::Result<PathBuf> {
        let exe = std::env::current_exe()?;
        Ok(exe.with_file_name(format!("{}{}", WORKER_PROGRAM, std::env::consts::EXE_SUFFIX)))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, kind: WorkerKind) -> std::io::Result<Worker> {
        debug!("launch {} {:?} {}", self.program.display(), self.args, kind);
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(kind.as_arg())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Worker::process(child)
    }
}

/// Launches each worker as a task in this process
pub struct TaskLauncher<F, P> {
    make_processor: Arc<F>,
    _processor: PhantomData<fn() -> P>,
}

impl<F, P> TaskLauncher<F, P>
where
    F: Fn(&JobRequest) -> P + Send + Sync + 'static,
    P: DocumentProcessor + 'static,
{
    /// Launcher building a processor with `make_processor` for every parse job
    pub fn new(make_processor: F) -> Self {
        Self {
            make_processor: Arc::new(make_processor),
            _processor: PhantomData,
        }
    }
}

impl<F, P> Launcher for TaskLauncher<F, P>
where
    F: Fn(&JobRequest) -> P + Send + Sync + 'static,
    P: DocumentProcessor + 'static,
{
    fn launch(&self, kind: WorkerKind) -> std::io::Result<Worker> {
        let (local, mut remote) = Connection::pair()?;
        let make_processor = self.make_processor.clone();
        let handle = tokio::spawn(async move {
            let res = match kind {
                WorkerKind::Parse => {
                    worker::serve_parse(&mut remote, |req: &JobRequest| make_processor(req)).await
                }
                WorkerKind::TestRun => worker::serve_test_run(&mut remote).await,
            };
            if let Err(e) = res {
                error!("{} worker failed - {}", kind, e);
            }
        });
        Ok(Worker::task(local, handle))
    }
}
