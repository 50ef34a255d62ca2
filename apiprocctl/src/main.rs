use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use apiproc::{
    ApiFormat, JobRequest, JobResult, ProcessLauncher, Supervisor, SupervisorConfig,
    TestRunOutcome, TestRunRequest,
};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(version, about = "Run API processing jobs in isolated workers")]
struct Cli {
    #[command(flatten)]
    supervisor: SupervisorArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SupervisorArgs {
    /// Worker executable. Defaults to apiproc-worker next to this executable.
    #[arg(long, global = true, env = "APIPROC_WORKER")]
    worker: Option<PathBuf>,

    /// Maximum number of workers running at once
    #[arg(long, global = true, default_value_t = 4)]
    max_workers: usize,

    /// Kill a worker that has not finished within SECS
    #[arg(long, global = true, value_name = "SECS")]
    job_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, resolve and generate an API document
    Parse {
        /// File path or URL of the document
        #[arg(long)]
        source: String,
        /// Format of the document, e.g. "RAML 1.0" or "OAS 3.0"
        #[arg(long)]
        format: String,
        /// Content type override for OAS documents
        #[arg(long)]
        media_type: Option<String>,
        /// Directory the processing tool is located from
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Run the test server configured in a working directory
    TestRun {
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Serve the health probe and static index
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        #[arg(long, default_value = ".")]
        static_dir: PathBuf,
    },
}

impl SupervisorArgs {
    fn start(&self) -> Result<Supervisor> {
        let program = match &self.worker {
            Some(path) => path.clone(),
            None => ProcessLauncher::default_program()
                .with_context(|| "Unable to locate worker executable".to_string())?,
        };
        debug!("worker program {}", program.display());
        let config = SupervisorConfig {
            max_workers: self.max_workers,
            job_timeout: self.job_timeout.map(Duration::from_secs),
        };
        Ok(Supervisor::start(ProcessLauncher::new(program), config))
    }
}

fn working_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    std::path::absolute(&dir).with_context(|| format!("Invalid working directory {}", dir.display()))
}

/// Run a single parse job
async fn run_parse(sv: &Supervisor, req: JobRequest) -> Result<ExitCode> {
    match sv.submit_parse(req).await? {
        JobResult::Success { api, source } => {
            debug!("generated model for {}", source);
            println!("{}", api);
            Ok(ExitCode::SUCCESS)
        }
        JobResult::Failure { error } => {
            eprintln!("{}", error);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Run a single test-run job. Exits with the test server's exit code.
async fn run_test_run(sv: &Supervisor, req: TestRunRequest) -> Result<ExitCode> {
    let report = sv.submit_test_run(req).await?;
    match report.outcome {
        TestRunOutcome::Exited(code) => Ok(ExitCode::from(u8::try_from(code).unwrap_or(1))),
        TestRunOutcome::Failed(message) => {
            eprintln!("{}", message);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Parse {
            source,
            format,
            media_type,
            working_dir: dir,
        } => {
            let mut req = JobRequest::new(working_dir(dir)?, source, ApiFormat::from(format));
            req.media_type = media_type;
            let sv = cli.supervisor.start()?;
            let code = run_parse(&sv, req).await;
            sv.shutdown().await;
            code
        }
        Command::TestRun { working_dir: dir } => {
            let req = TestRunRequest {
                working_dir: working_dir(dir)?,
            };
            let sv = cli.supervisor.start()?;
            let code = run_test_run(&sv, req).await;
            sv.shutdown().await;
            code
        }
        Command::Serve { addr, static_dir } => {
            apiproc::http::serve(addr, static_dir)
                .await
                .with_context(|| format!("Failed to serve on {}", addr))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
