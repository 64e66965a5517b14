use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use docvl_core::{render_markdown, NormalizedResult};
use docvl_pipeline::{LogFormat, OcrService, ServiceConfig};

#[derive(Parser)]
#[command(name = "docvl", version, about = "Document OCR service over a lazily loaded vision-language pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to service config file (JSON).
    #[arg(long, global = true, env = "DOCVL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "DOCVL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format (text, json).
    #[arg(long, global = true, env = "DOCVL_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Model device, e.g. gpu, gpu:1 or cpu.
    #[arg(long, global = true, env = "DOCVL_DEVICE")]
    pub device: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server.
    Serve {
        /// Host to bind to.
        #[arg(long, env = "DOCVL_HOST")]
        host: Option<String>,
        /// Port to bind to.
        #[arg(long, env = "DOCVL_PORT")]
        port: Option<u16>,
        /// Load the pipeline before accepting requests instead of on first use.
        #[arg(long)]
        eager: bool,
    },
    /// Process a single image and print results.
    Process {
        /// Input file path.
        #[arg(required = true)]
        input: PathBuf,
        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
    /// Process every file in a directory.
    Batch {
        /// Input directory.
        #[arg(required = true)]
        input_dir: PathBuf,
        /// Output directory for results.
        #[arg(required = true)]
        output_dir: PathBuf,
        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Markdown,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Markdown => "md",
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut ServiceConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(device) = &self.device {
            config.pipeline.use_gpu = device != "cpu";
            config.pipeline.device = device.clone();
        }
        if let Command::Serve { host, port, .. } = &self.command {
            if let Some(host) = host {
                config.app.host = host.clone();
            }
            if let Some(port) = port {
                config.app.port = *port;
            }
        }
    }
}

/// Render normalized results in the requested format.
pub fn render(results: &[NormalizedResult], format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(results)?,
        OutputFormat::Jsonl => {
            let mut out = String::new();
            for result in results {
                out.push_str(&serde_json::to_string(result)?);
                out.push('\n');
            }
            out
        }
        OutputFormat::Markdown => render_markdown(results),
    })
}

/// Process a single file via CLI.
pub fn process_file(service: &OcrService, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let output = service.process_path(path)?;
    println!("{}", render(&output.results, format)?);
    eprintln!(
        "\n[{} units | {:.1}ms]",
        output.results.len(),
        output.elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Process every regular file in `input_dir`, writing one result file per
/// input. Failures are logged and skipped. Returns (succeeded, failed).
pub fn process_dir(
    service: &OcrService,
    input_dir: &Path,
    output_dir: &Path,
    format: OutputFormat,
) -> anyhow::Result<(usize, usize)> {
    std::fs::create_dir_all(output_dir)?;

    let mut inputs: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    inputs.sort();

    let (mut ok, mut failed) = (0, 0);
    for path in inputs {
        tracing::info!(file = %path.display(), "processing");
        let result = service
            .process_path(&path)
            .map_err(anyhow::Error::from)
            .and_then(|output| render(&output.results, format));
        match result {
            Ok(rendered) => {
                let stem = path.file_stem().unwrap_or_default().to_string_lossy();
                let out = output_dir.join(format!("{stem}.{}", format.extension()));
                std::fs::write(&out, rendered)?;
                ok += 1;
            }
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "failed");
                failed += 1;
            }
        }
    }

    Ok((ok, failed))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn results() -> Vec<NormalizedResult> {
        vec![
            json!({"page_index": 0}).as_object().unwrap().clone(),
            json!({"page_index": 1}).as_object().unwrap().clone(),
        ]
    }

    #[test]
    fn test_render_jsonl_one_line_per_result() {
        let out = render(&results(), OutputFormat::Jsonl).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, ["{\"page_index\":0}", "{\"page_index\":1}"]);
    }

    #[test]
    fn test_render_markdown() {
        let out = render(&results(), OutputFormat::Markdown).unwrap();
        assert!(out.starts_with("# Document OCR Results"));
        assert!(out.contains("## Element 2"));
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "docvl",
            "--device",
            "cpu",
            "--log-format",
            "json",
            "serve",
            "--port",
            "9000",
        ]);
        let mut config = ServiceConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.app.port, 9000);
        assert_eq!(config.app.host, "0.0.0.0");
        assert!(!config.pipeline.use_gpu);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
