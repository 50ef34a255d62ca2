//! Parse, resolve and generate pipeline run by parse workers
mod processor;
mod tool;

pub use processor::{Document, DocumentProcessor, GeneratorSpec, ResolutionMode, ToolError};
pub use tool::{CommandProcessor, ToolConfig};

use tracing::{debug, error, info};

use crate::{ApiFormat, JobRequest, JobResult};

/// Content type for RAML documents
pub const RAML_CONTENT_TYPE: &str = "application/yaml";

/// Default content type for OAS documents
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Prefix of every failure message reported by the pipeline
pub const ERROR_PREFIX: &str = "Unable to process API document: ";

/// Stages of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Parsing,
    Resolving,
    Generating,
    Done,
}

impl Stage {
    /// The stage following this one. `Done` is final.
    pub fn next(self) -> Stage {
        match self {
            Stage::Idle => Stage::Parsing,
            Stage::Parsing => Stage::Resolving,
            Stage::Resolving => Stage::Generating,
            Stage::Generating | Stage::Done => Stage::Done,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Parsing => "parsing",
            Stage::Resolving => "resolving",
            Stage::Generating => "generating",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Failure of a pipeline stage
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{}{}", ERROR_PREFIX, .cause)]
pub struct PipelineError {
    pub stage: Stage,
    pub cause: ToolError,
}

/// Select the content type hint for given format
pub fn content_type(format: &ApiFormat, media_type: Option<&str>) -> Option<String> {
    if format.is_raml() {
        Some(RAML_CONTENT_TYPE.to_string())
    } else if format.is_oas() {
        Some(media_type.unwrap_or(JSON_CONTENT_TYPE).to_string())
    } else {
        None
    }
}

/// Normalize a file path or URL to the URI handed to the parser
pub fn normalize_source(source: &str) -> String {
    if has_scheme(source, "http://") || has_scheme(source, "https://") {
        source.to_string()
    } else {
        format!("file://{}", source)
    }
}

/// URI schemes are case-insensitive
fn has_scheme(source: &str, scheme: &str) -> bool {
    source
        .get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}

/// Run the pipeline for a job. Always produces exactly one result.
pub async fn run<P: DocumentProcessor>(processor: &P, req: &JobRequest) -> JobResult {
    let uri = normalize_source(&req.source);
    match execute(processor, req, &uri).await {
        Ok(api) => {
            info!("processed {} ({})", uri, req.format);
            JobResult::Success { api, source: uri }
        }
        Err(e) => {
            error!("failed while {} {} - {}", e.stage, uri, e.cause);
            JobResult::Failure {
                error: e.to_string(),
            }
        }
    }
}

async fn execute<P: DocumentProcessor>(
    processor: &P,
    req: &JobRequest,
    uri: &str,
) -> Result<String, PipelineError> {
    let mut stage = Stage::Idle;
    let content_type = content_type(&req.format, req.media_type.as_deref());

    stage = advance(stage);
    let doc = processor
        .parse(&req.format, content_type.as_deref(), uri)
        .await
        .map_err(|cause| PipelineError { stage, cause })?;

    stage = advance(stage);
    let doc = processor
        .resolve(&req.format, doc, ResolutionMode::Editing)
        .await
        .map_err(|cause| PipelineError { stage, cause })?;

    stage = advance(stage);
    let api = processor
        .generate(&doc)
        .await
        .map_err(|cause| PipelineError { stage, cause })?;

    advance(stage);
    Ok(api)
}

fn advance(stage: Stage) -> Stage {
    let next = stage.next();
    debug!("stage {} -> {}", stage, next);
    next
}
