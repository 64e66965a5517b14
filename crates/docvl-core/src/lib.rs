pub mod error;
pub mod markdown;
pub mod normalize;
pub mod traits;
pub mod types;

pub use error::{BoxError, ErrorKind, OcrError, Result};
pub use markdown::render_markdown;
pub use normalize::{normalize_unit, normalize_units, NormalizationReport, DEPTH_PLACEHOLDER, MAX_DEPTH};
pub use traits::{DocumentPipeline, JsonDocument, PipelineFactory, SelfDescribing, UnitStream};
pub use types::*;
