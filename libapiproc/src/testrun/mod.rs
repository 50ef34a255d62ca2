//! Test-run worker. Starts a test server for a working directory and relays its exit code.
mod config;

pub use config::{load_config, TestRunConfig, CONFIG_FILE};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::{Connection, TestRunEvent, TestRunRequest};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No test configuration at {0}")]
    MissingConfig(PathBuf),

    #[error("Unable to read {path} - {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid test configuration {path} - {source}")]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to start test server {command} - {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Test server did not exit within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before a request was received")]
    ConnectionClosed,

    #[error("IO Error - {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A test server created for one working directory
#[derive(Debug)]
pub struct TestServer {
    config: TestRunConfig,
    working_dir: PathBuf,
}

impl TestServer {
    pub fn new(config: TestRunConfig, working_dir: &Path) -> Self {
        Self {
            config,
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// Start the server and wait for it to exit. Returns the exit code, `-1` if killed by a signal.
    /// The server's output goes to stderr, stdout is reserved for the worker's channel.
    pub async fn start(self) -> Result<i32> {
        debug!(
            "start {} {:?} in {}",
            self.config.command,
            self.config.args,
            self.working_dir.display()
        );
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        let status = match self.config.timeout() {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    kill(&mut child).await;
                    return Err(Error::Timeout(limit));
                }
            },
            None => child.wait().await?,
        };
        Ok(status.code().unwrap_or(-1))
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        error!("Failed to kill test server - {}", e);
    }
}

/// Handle exactly one test-run request on given connection
pub async fn serve(conn: &mut Connection) -> Result<()> {
    let req: TestRunRequest = conn.recv().await.ok_or(Error::ConnectionClosed)??;
    info!("test run for {}", req.working_dir.display());

    let terminal = match run(conn, &req.working_dir).await {
        Ok(code) => TestRunEvent::Result { result: code },
        Err(e) => {
            error!("test run failed - {}", e);
            TestRunEvent::Error {
                message: e.to_string(),
            }
        }
    };
    conn.send(&terminal).await?;
    Ok(())
}

async fn run(conn: &mut Connection, working_dir: &Path) -> Result<i32> {
    let config = load_config(working_dir).await?;
    notify(conn, "Config loaded").await?;

    let server = TestServer::new(config, working_dir);
    notify(conn, "Server created").await?;

    notify(conn, "Server starting").await?;
    let code = server.start().await?;
    notify(conn, format!("Server exited with code {}", code)).await?;

    Ok(code)
}

async fn notify(conn: &mut Connection, message: impl Into<String>) -> Result<()> {
    Ok(conn.send(&TestRunEvent::log(message)).await?)
}
