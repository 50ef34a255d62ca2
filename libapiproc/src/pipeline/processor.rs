//! Contract of the external document processing tool
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::ApiFormat;

/// An opaque document produced by the processing tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub serde_json::Value);

/// Resolution pass applied to a parsed document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    Editing,
}

/// Generator used to serialize resolved documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorSpec {
    pub name: String,
    pub mime_type: String,
}

impl Default for GeneratorSpec {
    fn default() -> Self {
        Self {
            name: "AMF Graph".to_string(),
            mime_type: "application/ld+json".to_string(),
        }
    }
}

/// Failure reported by the processing tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Generic message
    pub message: String,
    /// Structured detail, preferred over `message` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The most specific description available
    pub fn describe(&self) -> &str {
        self.detail.as_deref().unwrap_or(&self.message)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl std::error::Error for ToolError {}

/// Document processing tool driven by a parse worker.
/// A worker creates one processor per job and calls [DocumentProcessor::init] once before use.
pub trait DocumentProcessor: Send + Sync {
    /// Prepare the tool
    fn init(&mut self) -> impl Future<Output = Result<(), ToolError>> + Send;

    /// Parse document at `uri`
    fn parse(
        &self,
        format: &ApiFormat,
        content_type: Option<&str>,
        uri: &str,
    ) -> impl Future<Output = Result<Document, ToolError>> + Send;

    /// Resolve a parsed document
    fn resolve(
        &self,
        format: &ApiFormat,
        doc: Document,
        mode: ResolutionMode,
    ) -> impl Future<Output = Result<Document, ToolError>> + Send;

    /// Serialize a resolved document
    fn generate(&self, doc: &Document) -> impl Future<Output = Result<String, ToolError>> + Send;
}
