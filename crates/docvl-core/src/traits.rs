use std::path::Path;
use std::sync::Arc;

use crate::error::BoxError;
use crate::types::{NormalizedResult, RawUnit};

/// One-shot sequence of raw inference units produced by a prediction call.
///
/// The sequence is finite for a given input and cannot be restarted; a second
/// pass over the same input requires another call to `predict`.
pub type UnitStream<'a> = Box<dyn Iterator<Item = std::result::Result<RawUnit, BoxError>> + Send + 'a>;

/// The external document model.
///
/// Implementations are constructed once per process by the lifecycle manager
/// and then shared by every request thread.
pub trait DocumentPipeline: Send + Sync {
    /// Human-readable name for tracing/metrics.
    fn name(&self) -> &str;

    /// Run the model against an image on disk.
    fn predict(&self, path: &Path) -> std::result::Result<UnitStream<'_>, BoxError>;
}

/// Constructs the pipeline on first use. Configuration, if any, is captured
/// by the closure.
pub type PipelineFactory =
    Box<dyn Fn() -> std::result::Result<Arc<dyn DocumentPipeline>, BoxError> + Send + Sync>;

/// A raw unit that can serialize itself to a JSON mapping.
pub trait SelfDescribing: Send + Sync {
    /// Type name reported in logs.
    fn type_name(&self) -> &str;

    fn to_json(&self) -> std::result::Result<NormalizedResult, BoxError>;
}

/// Self-description backed by an already-decoded JSON document, as written by
/// the model's own `save_to_json` output.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    pub source: String,
    pub body: NormalizedResult,
}

impl SelfDescribing for JsonDocument {
    fn type_name(&self) -> &str {
        "JsonDocument"
    }

    fn to_json(&self) -> std::result::Result<NormalizedResult, BoxError> {
        Ok(self.body.clone())
    }
}
