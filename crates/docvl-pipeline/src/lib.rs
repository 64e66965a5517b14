pub mod config;
pub mod external;
pub mod invoker;
pub mod lifecycle;
pub mod service;
pub mod staging;

pub use config::{AppConfig, LogFormat, LoggingConfig, PipelineConfig, ServiceConfig};
pub use external::SubprocessPipeline;
pub use invoker::InferenceInvoker;
pub use lifecycle::PipelineManager;
pub use service::{OcrService, ProcessOutput};
pub use staging::{InputStager, StagedInput};
