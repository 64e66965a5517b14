//! Fake pipelines shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docvl_core::{
    BoxError, DocumentPipeline, NormalizedResult, OpaqueValue, PipelineFactory, RawUnit,
    SelfDescribing, UnitStream,
};
use docvl_pipeline::{OcrService, PipelineConfig};
use serde_json::json;

/// Self-describing unit tagged with its position in the sequence.
pub struct Page {
    pub index: usize,
    pub fail: bool,
}

impl SelfDescribing for Page {
    fn type_name(&self) -> &str {
        "Page"
    }

    fn to_json(&self) -> Result<NormalizedResult, BoxError> {
        if self.fail {
            return Err("page refused to describe itself".into());
        }
        match json!({"page_index": self.index, "parsing_res_list": []}) {
            serde_json::Value::Object(map) => Ok(map),
            _ => unreachable!(),
        }
    }
}

/// Pipeline whose behavior is chosen by the content of the input file:
///
/// - `units:N`       → N self-describing pages
/// - `opaque`        → one attributed object without self-description
/// - `fail-predict`  → prediction error
/// - `fail-iter`     → one page, then an iteration error
/// - `fail-describe` → one page whose self-description fails
/// - `empty`         → no units
pub struct ScriptedPipeline {
    pub seen: parking_lot::Mutex<Vec<PathBuf>>,
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self {
            seen: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl DocumentPipeline for ScriptedPipeline {
    fn name(&self) -> &str {
        "scripted"
    }

    fn predict(&self, path: &Path) -> Result<UnitStream<'_>, BoxError> {
        self.seen.lock().push(path.to_path_buf());
        let script = std::fs::read_to_string(path)?;
        let script = script.trim();

        if let Some(n) = script.strip_prefix("units:") {
            let n: usize = n.parse()?;
            return Ok(Box::new(
                (0..n).map(|index| Ok::<_, BoxError>(RawUnit::self_describing(Page { index, fail: false }))),
            ));
        }

        match script {
            "opaque" => Ok(Box::new(std::iter::once(Ok::<_, BoxError>(RawUnit::Opaque(
                OpaqueValue::object(
                    "LayoutBlock",
                    [
                        ("bbox", OpaqueValue::from(vec![0i64, 0, 10, 10])),
                        ("label", OpaqueValue::from("text")),
                        ("compute", OpaqueValue::callable("compute")),
                    ],
                ),
            ))))),
            "fail-predict" => Err("CUDA out of memory".into()),
            "fail-iter" => Ok(Box::new(
                vec![
                    Ok::<RawUnit, BoxError>(RawUnit::self_describing(Page { index: 0, fail: false })),
                    Err("decoder crashed on page 2".into()),
                ]
                .into_iter(),
            )),
            "fail-describe" => Ok(Box::new(std::iter::once(Ok::<_, BoxError>(RawUnit::self_describing(
                Page { index: 0, fail: true },
            ))))),
            "empty" => Ok(Box::new(std::iter::empty::<Result<RawUnit, BoxError>>())),
            other => Err(format!("unknown script '{other}'").into()),
        }
    }
}

/// Pipeline that records how many `predict` calls are in flight at once.
/// Each call holds for `hold` before returning one page.
pub struct OverlapPipeline {
    active: AtomicUsize,
    pub peak: AtomicUsize,
    hold: Duration,
}

impl DocumentPipeline for OverlapPipeline {
    fn name(&self) -> &str {
        "overlap"
    }

    fn predict(&self, _path: &Path) -> Result<UnitStream<'_>, BoxError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Box::new(std::iter::once(Ok::<_, BoxError>(RawUnit::self_describing(
            Page { index: 0, fail: false },
        )))))
    }
}

/// Service over a shared [`OverlapPipeline`].
pub fn overlap_service(
    staging_dir: &Path,
    serialize_inference: bool,
) -> (OcrService, Arc<OverlapPipeline>) {
    let pipeline = Arc::new(OverlapPipeline {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        hold: Duration::from_millis(100),
    });
    let shared = pipeline.clone();
    let config = PipelineConfig {
        staging_dir: Some(staging_dir.to_path_buf()),
        serialize_inference,
        ..PipelineConfig::default()
    };
    let factory: PipelineFactory = Box::new(move || -> Result<Arc<dyn DocumentPipeline>, BoxError> {
        let pipeline: Arc<dyn DocumentPipeline> = shared.clone();
        Ok(pipeline)
    });
    (OcrService::new(&config, factory), pipeline)
}

/// Factory that counts constructions and optionally sleeps to widen races.
pub fn counting_factory(
    constructions: Arc<AtomicUsize>,
    delay: Duration,
) -> PipelineFactory {
    Box::new(move || -> Result<Arc<dyn DocumentPipeline>, BoxError> {
        constructions.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(delay);
        Ok(Arc::new(ScriptedPipeline::new()))
    })
}

/// Service over a scripted pipeline, staging into `staging_dir`.
pub fn scripted_service(staging_dir: &Path) -> (OcrService, Arc<AtomicUsize>) {
    let constructions = Arc::new(AtomicUsize::new(0));
    let config = PipelineConfig {
        staging_dir: Some(staging_dir.to_path_buf()),
        ..PipelineConfig::default()
    };
    let service = OcrService::new(
        &config,
        counting_factory(constructions.clone(), Duration::ZERO),
    );
    (service, constructions)
}

/// Number of entries left in a directory.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
