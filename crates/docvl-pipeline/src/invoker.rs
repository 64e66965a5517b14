use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use docvl_core::{BoxError, OcrError, RawUnit, Result};

use crate::lifecycle::PipelineManager;

/// Drives the pipeline against one staged input and collects the raw units.
///
/// Every failure in prediction or iteration comes back as
/// `OcrError::Processing` carrying the input path. The pipeline handle is
/// left untouched, so later requests are unaffected.
pub struct InferenceInvoker {
    lifecycle: Arc<PipelineManager>,
    /// Held for the whole predict-and-iterate span when set.
    inference_lock: Option<Mutex<()>>,
}

impl InferenceInvoker {
    pub fn new(lifecycle: Arc<PipelineManager>, serialize_inference: bool) -> Self {
        Self {
            lifecycle,
            inference_lock: serialize_inference.then(|| Mutex::new(())),
        }
    }

    /// Ensure the pipeline exists, run prediction on `path` and drain the
    /// resulting one-shot sequence.
    pub fn invoke(&self, path: &Path) -> Result<Vec<RawUnit>> {
        let pipeline = self.lifecycle.ensure_ready()?;

        let _guard = self.inference_lock.as_ref().map(|lock| lock.lock());

        let start = Instant::now();
        tracing::info!(path = %path.display(), pipeline = pipeline.name(), "processing image");

        let units = pipeline
            .predict(path)
            .and_then(|stream| stream.collect::<std::result::Result<Vec<_>, BoxError>>())
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "prediction failed");
                OcrError::processing(path, e)
            })?;

        tracing::info!(
            path = %path.display(),
            units = units.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "image processed"
        );

        Ok(units)
    }
}
