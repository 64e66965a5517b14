//! Long-lived worker process hosting the document-parsing model.
//!
//! The worker is started once, when the pipeline is constructed, and keeps
//! the model loaded for the life of the service:
//!
//! ```text
//! <command...> --device <dev> [--enable_mkldnn True|False] [extra..]
//! ```
//!
//! It speaks JSON lines. After loading the model it prints
//! `{"event":"ready","version":..}` (or `{"event":"error","message":..}` and
//! exits). Each prediction is one request line on stdin,
//! `{"input":<image>,"save_path":<dir>}`, answered by `{"event":"done"}` or
//! `{"event":"error","message":..}`. Lines on stdout that are not events
//! are ignored.
//!
//! Each `*.json` file written under `<dir>` is one raw unit. Files are
//! ordered by page index (`doc_<n>_res.json`), then by name, and read
//! lazily as the returned sequence is consumed.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;

use docvl_core::{BoxError, DocumentPipeline, PipelineFactory, RawUnit, UnitStream};

use crate::config::PipelineConfig;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no model command configured")]
    NoCommand,

    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model worker `{command}` exited ({status})")]
    WorkerExited { command: String, status: String },

    #[error("model reported an error: {0}")]
    Rejected(String),

    #[error("model worker channel failed: {0}")]
    Channel(#[source] std::io::Error),

    #[error("failed to encode worker request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to read model output {}: {source}", path.display())]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in model output {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create output directory: {0}")]
    OutputDir(#[source] std::io::Error),
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    input: &'a Path,
    save_path: &'a Path,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum WorkerEvent {
    Ready {
        #[serde(default)]
        version: Option<String>,
    },
    Done,
    Error {
        message: String,
    },
}

/// How to start the worker.
#[derive(Debug, Clone)]
struct Launcher {
    program: String,
    args: Vec<String>,
}

impl Launcher {
    fn from_config(config: &PipelineConfig) -> Result<Self, ModelError> {
        let (program, leading_args) = config.command.split_first().ok_or(ModelError::NoCommand)?;

        let mut args = leading_args.to_vec();
        args.push("--device".to_string());
        args.push(config.device_arg());
        if let Some(mkldnn) = config.mkldnn_flag() {
            args.push("--enable_mkldnn".to_string());
            args.push(if mkldnn { "True" } else { "False" }.to_string());
        }
        args.extend(config.extra_args.iter().cloned());

        Ok(Self {
            program: program.clone(),
            args,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }

    /// Start the worker and wait until the model is loaded.
    fn spawn(&self) -> Result<(Worker, String), ModelError> {
        let mut child = self.command().spawn().map_err(|e| ModelError::Launch {
            command: self.program.clone(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ModelError::Channel(std::io::Error::other(
                "worker pipes unavailable",
            )));
        };

        let mut worker = Worker {
            command: self.program.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        match worker.next_event()? {
            WorkerEvent::Ready { version } => Ok((worker, version.unwrap_or_else(|| "unknown".into()))),
            WorkerEvent::Error { message } => Err(ModelError::Rejected(message)),
            WorkerEvent::Done => Err(ModelError::Rejected(
                "worker answered before it was ready".to_string(),
            )),
        }
    }
}

/// A running worker and its protocol pipes. Killed on drop.
struct Worker {
    command: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn predict(&mut self, input: &Path, save_path: &Path) -> Result<(), ModelError> {
        let mut line = serde_json::to_vec(&PredictRequest { input, save_path }).map_err(ModelError::Encode)?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .and_then(|()| self.stdin.flush())
            .map_err(ModelError::Channel)?;

        match self.next_event()? {
            WorkerEvent::Done => Ok(()),
            WorkerEvent::Error { message } => Err(ModelError::Rejected(message)),
            WorkerEvent::Ready { .. } => Err(ModelError::Rejected(
                "worker restarted mid-request".to_string(),
            )),
        }
    }

    fn next_event(&mut self) -> Result<WorkerEvent, ModelError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.stdout.read_line(&mut line).map_err(ModelError::Channel)?;
            if read == 0 {
                let status = match self.child.wait() {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(ModelError::WorkerExited {
                    command: self.command.clone(),
                    status,
                });
            }
            match serde_json::from_str::<WorkerEvent>(line.trim()) {
                Ok(event) => return Ok(event),
                Err(_) => tracing::debug!(line = line.trim(), "ignoring worker output"),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The model, loaded once in a worker process and reused across predictions.
///
/// Requests to the worker are strictly one at a time. If the worker dies,
/// the request in flight fails and the next one starts a fresh worker.
pub struct SubprocessPipeline {
    launcher: Launcher,
    worker: Mutex<Worker>,
}

impl SubprocessPipeline {
    /// Start the worker and wait for the model to load.
    pub fn launch(config: &PipelineConfig) -> Result<Self, ModelError> {
        let launcher = Launcher::from_config(config)?;
        let (worker, version) = launcher.spawn()?;

        tracing::info!(
            command = %launcher.program,
            %version,
            device = %config.device_arg(),
            pid = worker.child.id(),
            "model worker ready"
        );

        Ok(Self {
            launcher,
            worker: Mutex::new(worker),
        })
    }

    /// Factory for the lifecycle manager.
    pub fn factory(config: PipelineConfig) -> PipelineFactory {
        Box::new(move || -> Result<Arc<dyn DocumentPipeline>, BoxError> {
            Ok(Arc::new(Self::launch(&config)?))
        })
    }

    fn run(&self, input: &Path, save_path: &Path) -> Result<(), ModelError> {
        let mut worker = self.worker.lock();
        if worker.has_exited() {
            tracing::warn!(command = %self.launcher.program, "model worker gone, restarting");
            let (fresh, version) = self.launcher.spawn()?;
            tracing::info!(%version, pid = fresh.child.id(), "model worker restarted");
            *worker = fresh;
        }
        worker.predict(input, save_path)
    }
}

impl DocumentPipeline for SubprocessPipeline {
    fn name(&self) -> &str {
        &self.launcher.program
    }

    fn predict(&self, path: &Path) -> Result<UnitStream<'_>, BoxError> {
        let out_dir = tempfile::Builder::new()
            .prefix("docvl-out-")
            .tempdir()
            .map_err(ModelError::OutputDir)?;

        self.run(path, out_dir.path())?;

        let mut files = Vec::new();
        collect_json_files(out_dir.path(), &mut files).map_err(|e| ModelError::ReadOutput {
            path: out_dir.path().to_path_buf(),
            source: e,
        })?;
        files.sort_by_cached_key(|path| page_order(path));

        tracing::debug!(files = files.len(), "model wrote result files");

        Ok(Box::new(JsonResultFiles {
            files: files.into_iter(),
            _dir: out_dir,
        }))
    }
}

/// Sort key for result files: page index parsed from `<stem>_<n>_res.json`
/// (or `<stem>_<n>.json`) first, unindexed files last, then the name.
fn page_order(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.strip_suffix("_res").unwrap_or(stem))
        .and_then(|stem| stem.rsplit('_').next())
        .and_then(|n| n.parse::<u64>().ok());
    (index.unwrap_or(u64::MAX), name)
}

/// Lazily decodes result files. Owns the output dir, which is removed when
/// the sequence is dropped.
struct JsonResultFiles {
    files: std::vec::IntoIter<PathBuf>,
    _dir: TempDir,
}

impl Iterator for JsonResultFiles {
    type Item = Result<RawUnit, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.files.next()?;
        Some(read_unit(&path).map_err(Into::into))
    }
}

fn read_unit(path: &Path) -> Result<RawUnit, ModelError> {
    let data = std::fs::read(path).map_err(|e| ModelError::ReadOutput {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value = serde_json::from_slice(&data).map_err(|e| ModelError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(RawUnit::from_json(source, value))
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
