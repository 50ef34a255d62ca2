//! [DocumentProcessor] backed by an external program
//!
//! Every operation runs the program once with the operation name as the last argument.
//! The request is written to stdin as JSON, and the program replies on stdout with either
//! `{"ok": <value>}` or `{"error": {"message": .., "detail": ..}}`.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Document, DocumentProcessor, GeneratorSpec, ResolutionMode, ToolError};
use crate::ApiFormat;

/// How to invoke the processing tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Processor running a [ToolConfig] inside a job's working directory
#[derive(Debug)]
pub struct CommandProcessor {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    generator: GeneratorSpec,
    ready: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ToolRequest<'a> {
    Init {
        generator: &'a GeneratorSpec,
    },
    Parse {
        format: &'a ApiFormat,
        #[serde(rename = "contentType")]
        content_type: Option<&'a str>,
        uri: &'a str,
    },
    Resolve {
        format: &'a ApiFormat,
        mode: ResolutionMode,
        document: &'a Document,
    },
    Generate {
        generator: &'a GeneratorSpec,
        document: &'a Document,
    },
}

impl ToolRequest<'_> {
    fn op(&self) -> &'static str {
        match self {
            ToolRequest::Init { .. } => "init",
            ToolRequest::Parse { .. } => "parse",
            ToolRequest::Resolve { .. } => "resolve",
            ToolRequest::Generate { .. } => "generate",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ToolReply {
    Ok(serde_json::Value),
    Error(ToolError),
}

impl CommandProcessor {
    /// Locate the tool for a job.
    /// Relative program paths with more than one component are resolved against `working_dir`,
    /// bare program names are looked up on `PATH`.
    pub fn locate(working_dir: &Path, config: &ToolConfig) -> Self {
        let program = if config.program.is_relative() && config.program.components().count() > 1
        {
            working_dir.join(&config.program)
        } else {
            config.program.clone()
        };
        Self {
            program,
            args: config.args.clone(),
            working_dir: working_dir.to_path_buf(),
            generator: GeneratorSpec::default(),
            ready: false,
        }
    }

    /// Path of the program that will be run
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn call(&self, req: ToolRequest<'_>) -> Result<serde_json::Value, ToolError> {
        let op = req.op();
        debug!("call {} {:?} {}", self.program.display(), self.args, op);

        let input = serde_json::to_vec(&req)
            .map_err(|e| ToolError::new(format!("Unable to encode {} request - {}", op, e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(op)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::new(format!(
                    "Failed to start {} - {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Tool may reply before it has read all of its input
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // Tool may exit without consuming its input
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("{} did not read request - {}", op, e);
                }
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output =
            output.map_err(|e| ToolError::new(format!("Failed to wait on {} - {}", op, e)))?;

        match serde_json::from_slice::<ToolReply>(&output.stdout) {
            Ok(ToolReply::Ok(value)) => Ok(value),
            Ok(ToolReply::Error(e)) => Err(e),
            Err(_) if !output.status.success() => {
                let err = ToolError::new(format!("{} failed - {}", op, output.status));
                let stderr = String::from_utf8_lossy(&output.stderr);
                match stderr.trim() {
                    "" => Err(err),
                    detail => Err(err.with_detail(detail)),
                }
            }
            Err(e) => Err(ToolError::new(format!("Invalid reply to {} - {}", op, e))),
        }
    }
}

impl DocumentProcessor for CommandProcessor {
    async fn init(&mut self) -> Result<(), ToolError> {
        self.call(ToolRequest::Init {
            generator: &self.generator,
        })
        .await?;
        self.ready = true;
        Ok(())
    }

    async fn parse(
        &self,
        format: &ApiFormat,
        content_type: Option<&str>,
        uri: &str,
    ) -> Result<Document, ToolError> {
        if !self.ready {
            return Err(ToolError::new("Processor used before init"));
        }
        let value = self
            .call(ToolRequest::Parse {
                format,
                content_type,
                uri,
            })
            .await?;
        Ok(Document(value))
    }

    async fn resolve(
        &self,
        format: &ApiFormat,
        doc: Document,
        mode: ResolutionMode,
    ) -> Result<Document, ToolError> {
        let value = self
            .call(ToolRequest::Resolve {
                format,
                mode,
                document: &doc,
            })
            .await?;
        Ok(Document(value))
    }

    async fn generate(&self, doc: &Document) -> Result<String, ToolError> {
        let value = self
            .call(ToolRequest::Generate {
                generator: &self.generator,
                document: doc,
            })
            .await?;
        match value {
            serde_json::Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}
