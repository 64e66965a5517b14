use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use docvl_core::{DocumentPipeline, OcrError, PipelineFactory, Result, ServiceStatus};

use crate::config::PipelineConfig;

/// Owns the single process-wide pipeline handle.
///
/// Construction is deferred until the first `ensure_ready()` and runs at most
/// once, however many threads race to it. The fast path is a single atomic
/// read of the handle slot. Threads that miss it take the init lock, check
/// again, and only the first one through calls the factory; the rest block
/// on the lock and then see the finished handle.
///
/// A failed construction leaves the slot empty so a later call can retry.
/// Nothing is retried automatically.
pub struct PipelineManager {
    factory: PipelineFactory,
    handle: OnceLock<Arc<dyn DocumentPipeline>>,
    init_lock: Mutex<()>,
    init_elapsed: OnceLock<Duration>,
    gpu_enabled: bool,
    device: String,
}

impl PipelineManager {
    pub fn new(factory: PipelineFactory, gpu_enabled: bool, device: impl Into<String>) -> Self {
        Self {
            factory,
            handle: OnceLock::new(),
            init_lock: Mutex::new(()),
            init_elapsed: OnceLock::new(),
            gpu_enabled,
            device: device.into(),
        }
    }

    /// Build a manager whose status reflects `config`.
    pub fn with_config(config: &PipelineConfig, factory: PipelineFactory) -> Self {
        Self::new(factory, config.use_gpu, config.device.clone())
    }

    /// Return the pipeline handle, constructing it on first use.
    pub fn ensure_ready(&self) -> Result<&Arc<dyn DocumentPipeline>> {
        if let Some(handle) = self.handle.get() {
            return Ok(handle);
        }

        let _guard = self.init_lock.lock();
        if let Some(handle) = self.handle.get() {
            return Ok(handle);
        }

        tracing::info!(
            gpu = self.gpu_enabled,
            device = %self.device,
            "initializing document pipeline"
        );
        let start = Instant::now();

        let pipeline = (self.factory)().map_err(|e| {
            tracing::error!(error = %e, "document pipeline initialization failed");
            OcrError::initialization(e)
        })?;

        let elapsed = start.elapsed();
        tracing::info!(
            pipeline = pipeline.name(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "document pipeline initialized"
        );
        metrics::histogram!("pipeline_init_seconds").record(elapsed.as_secs_f64());

        let _ = self.init_elapsed.set(elapsed);
        Ok(self.handle.get_or_init(|| pipeline))
    }

    /// Whether the handle exists. Never triggers construction.
    pub fn is_ready(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            initialized: self.is_ready(),
            gpu_enabled: self.gpu_enabled,
            device: self.device.clone(),
        }
    }

    /// How long the successful construction took, once it has happened.
    pub fn init_elapsed(&self) -> Option<Duration> {
        self.init_elapsed.get().copied()
    }
}
