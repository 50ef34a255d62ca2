use std::path::PathBuf;

use anyhow::{Context, Result};
use apiproc::pipeline::ToolConfig;
use apiproc::{worker, CommandProcessor, Connection, JobRequest, WorkerKind};
use clap::Parser;
use tracing::debug;

/// Serves exactly one job received on stdin and replies on stdout
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Kind of job to serve (parse, test-run)
    kind: WorkerKind,

    /// Document processing tool. Relative paths resolve against the job's working directory.
    #[arg(long, env = "APIPROC_TOOL", default_value = "amf")]
    tool: PathBuf,

    /// Argument passed to the tool ahead of the operation name
    #[arg(long = "tool-arg", allow_hyphen_values = true)]
    tool_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the job channel
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    debug!("starting {:?}", cli);

    let mut conn = Connection::stdio();
    let res = match cli.kind {
        WorkerKind::Parse => {
            let tool = ToolConfig {
                program: cli.tool,
                args: cli.tool_args,
            };
            worker::serve_parse(&mut conn, |req: &JobRequest| {
                CommandProcessor::locate(&req.working_dir, &tool)
            })
            .await
        }
        WorkerKind::TestRun => worker::serve_test_run(&mut conn).await,
    };
    res.with_context(|| format!("{} worker failed", cli.kind))?;

    conn.shutdown()
        .await
        .with_context(|| "Failed to close job channel".to_string())
}
