//! Messages sent between supervisor and workers
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// API description format tag carried by a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApiFormat {
    Raml10,
    Raml08,
    Oas20,
    Oas30,
    /// Tag not known to the pipeline. Passed through to the processor as-is.
    Other(String),
}

impl ApiFormat {
    /// The tag as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            ApiFormat::Raml10 => "RAML 1.0",
            ApiFormat::Raml08 => "RAML 0.8",
            ApiFormat::Oas20 => "OAS 2.0",
            ApiFormat::Oas30 => "OAS 3.0",
            ApiFormat::Other(tag) => tag,
        }
    }

    pub fn is_raml(&self) -> bool {
        matches!(self, ApiFormat::Raml10 | ApiFormat::Raml08)
    }

    pub fn is_oas(&self) -> bool {
        matches!(self, ApiFormat::Oas20 | ApiFormat::Oas30)
    }
}

impl From<String> for ApiFormat {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "RAML 1.0" => ApiFormat::Raml10,
            "RAML 0.8" => ApiFormat::Raml08,
            "OAS 2.0" => ApiFormat::Oas20,
            "OAS 3.0" => ApiFormat::Oas30,
            _ => ApiFormat::Other(tag),
        }
    }
}

impl From<&str> for ApiFormat {
    fn from(tag: &str) -> Self {
        ApiFormat::from(tag.to_string())
    }
}

impl From<ApiFormat> for String {
    fn from(format: ApiFormat) -> Self {
        match format {
            ApiFormat::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job for a parse worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Directory the document processing tool is located from
    pub working_dir: PathBuf,
    /// File path or URL of the document
    pub source: String,
    /// Format of the document
    #[serde(rename = "type")]
    pub format: ApiFormat,
    /// Content type override, only consulted for OAS formats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl JobRequest {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        source: impl Into<String>,
        format: impl Into<ApiFormat>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            source: source.into(),
            format: format.into(),
            media_type: None,
        }
    }

    /// Set the media type override
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// Terminal message of a parse worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    /// Generated model and the normalized source URI
    Success { api: String, source: String },
    /// Human readable failure
    Failure { error: String },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }
}

/// Job for a test-run worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRequest {
    pub working_dir: PathBuf,
}

/// Messages sent by a test-run worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestRunEvent {
    /// Progress notification. Zero or more precede the terminal message.
    Log { message: String },
    /// Exit code of the test server
    Result { result: i32 },
    /// The run could not complete
    Error { message: String },
}

impl TestRunEvent {
    pub fn log(message: impl Into<String>) -> Self {
        TestRunEvent::Log {
            message: message.into(),
        }
    }

    /// Whether this message concludes the exchange
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestRunEvent::Log { .. })
    }
}
