use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use docvl_core::{OcrError, Result};

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service name reported by `/` and `/health`.
    pub name: String,
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Prefix for the OCR routes.
    pub api_prefix: String,
    /// Maximum accepted upload size in bytes.
    pub max_upload_size: usize,
    /// Accepted file extensions, lowercase with leading dot.
    pub allowed_extensions: Vec<String>,
    /// Requests allowed into inference at once. Others wait.
    pub max_concurrent_requests: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "docvl".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            max_upload_size: 50 * 1024 * 1024, // 50 MB
            allowed_extensions: [".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".tif", ".pdf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_concurrent_requests: 3,
        }
    }
}

impl AppConfig {
    /// Whether an uploaded filename carries an accepted extension.
    /// Matching is case-insensitive; a missing extension is rejected.
    pub fn is_allowed_filename(&self, filename: &str) -> bool {
        let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let dotted = format!(".{}", ext.to_ascii_lowercase());
        self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&dotted))
    }
}

/// External model settings.
///
/// The model reads nothing from here directly; these values are turned into
/// command-line flags by [`crate::SubprocessPipeline`] and reported by
/// `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the model on GPU.
    pub use_gpu: bool,
    /// Device identifier: "gpu", "gpu:N" or "cpu".
    pub device: String,
    /// Enable MKL-DNN acceleration. Only honoured on CPU.
    pub enable_mkldnn: bool,
    /// Serialize prediction calls behind a lock. Leave on unless the model
    /// is known to be safe for concurrent inference.
    pub serialize_inference: bool,
    /// Program and leading arguments that start the model worker,
    /// e.g. `["python3", "worker/docvl_worker.py"]`.
    pub command: Vec<String>,
    /// Extra flags appended to the worker command line.
    pub extra_args: Vec<String>,
    /// Directory for staged uploads. None = system temp dir.
    pub staging_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_gpu: true,
            device: "gpu".to_string(),
            enable_mkldnn: true,
            serialize_inference: true,
            command: vec!["python3".to_string(), "worker/docvl_worker.py".to_string()],
            extra_args: Vec::new(),
            staging_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Value passed to the model's `--device` flag.
    pub fn device_arg(&self) -> String {
        if !self.use_gpu {
            "cpu".to_string()
        } else if self.device == "gpu" {
            "gpu:0".to_string()
        } else {
            self.device.clone()
        }
    }

    /// MKL-DNN only applies to CPU inference.
    pub fn mkldnn_flag(&self) -> Option<bool> {
        (!self.use_gpu).then_some(self.enable_mkldnn)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Complete runtime configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub app: AppConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load from a JSON file, or fall back to defaults when no path is given.
    /// Missing keys take their default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            OcrError::InvalidInput(format!("invalid config {}: {e}", path.display()))
        })
    }
}
