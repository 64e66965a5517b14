use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docvl_core::{
    normalize_units, NormalizationReport, NormalizedResult, OcrError, PipelineFactory, Result,
    ServiceStatus,
};

use crate::config::PipelineConfig;
use crate::external::SubprocessPipeline;
use crate::invoker::InferenceInvoker;
use crate::lifecycle::PipelineManager;
use crate::staging::{InputStager, StagedInput};

/// Output of one processing call.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// One normalized mapping per raw unit, in model order.
    pub results: Vec<NormalizedResult>,
    pub report: NormalizationReport,
    pub elapsed: Duration,
}

/// The OCR service: stage → invoke → normalize.
///
/// One instance per process, shared by reference across request threads.
pub struct OcrService {
    lifecycle: Arc<PipelineManager>,
    stager: InputStager,
    invoker: InferenceInvoker,
}

impl OcrService {
    /// Build the service around an injected pipeline factory.
    pub fn new(config: &PipelineConfig, factory: PipelineFactory) -> Self {
        let lifecycle = Arc::new(PipelineManager::with_config(config, factory));
        Self {
            invoker: InferenceInvoker::new(lifecycle.clone(), config.serialize_inference),
            stager: InputStager::new(config.staging_dir.clone()),
            lifecycle,
        }
    }

    /// Build the service around the subprocess-backed model.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config, SubprocessPipeline::factory(config.clone()))
    }

    /// Construct the pipeline now instead of on the first request.
    pub fn ensure_ready(&self) -> Result<()> {
        self.lifecycle.ensure_ready().map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    pub fn status(&self) -> ServiceStatus {
        self.lifecycle.status()
    }

    /// Process an image already on disk. The file is never removed.
    pub fn process_path(&self, path: &Path) -> Result<ProcessOutput> {
        self.process_staged(&StagedInput::existing(path))
    }

    /// Stage raw bytes to a temporary file, process it, and remove the file
    /// on every exit path.
    pub fn process_bytes(&self, bytes: &[u8], filename: Option<&str>) -> Result<ProcessOutput> {
        let staged = self.stager.stage_bytes(bytes, filename)?;
        let output = self.process_staged(&staged);
        staged.release();
        output
    }

    fn process_staged(&self, input: &StagedInput) -> Result<ProcessOutput> {
        let start = Instant::now();
        let path = input.path();

        let units = self.invoker.invoke(path)?;

        let (results, report) =
            normalize_units(&units).map_err(|e| OcrError::processing(path, e))?;

        if report.fallbacks > 0 {
            metrics::counter!("ocr_normalization_fallbacks_total")
                .increment(report.fallbacks as u64);
        }

        Ok(ProcessOutput {
            results,
            report,
            elapsed: start.elapsed(),
        })
    }
}
