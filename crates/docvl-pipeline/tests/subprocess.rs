//! Worker-backed pipeline against a shell stand-in for the model worker.

#![cfg(unix)]

use docvl_core::ErrorKind;
use docvl_pipeline::{OcrService, PipelineConfig};

/// Speaks the worker protocol. Logs each start to `$LAUNCH_LOG`, prints some
/// noise before the ready line, then writes one `doc_<n>_res.json` per page
/// into `save_path`. Page count or failure mode comes from the input file.
const FAKE_WORKER: &str = r#"
echo "launched $*" >> "$LAUNCH_LOG"
echo "loading model weights"
echo '{"event":"ready","version":"fake-vl 1.0"}'
while IFS= read -r line; do
    input=$(printf '%s\n' "$line" | sed 's/.*"input":"\([^"]*\)".*/\1/')
    save=$(printf '%s\n' "$line" | sed 's/.*"save_path":"\([^"]*\)".*/\1/')
    content=$(cat "$input")
    case "$content" in
        crash)
            echo "Segmentation fault in layout model" >&2
            exit 139
            ;;
        reject)
            echo '{"event":"error","message":"layout model failed"}'
            continue
            ;;
        garbage)
            echo "{not json" > "$save/doc_0_res.json"
            ;;
        *)
            mkdir -p "$save/nested"
            i=0
            while [ "$i" -lt "$content" ]; do
                printf '{"page_index": %d, "parsing_res_list": [{"block_label": "text", "block_content": "Hello"}]}' "$i" > "$save/nested/doc_${i}_res.json"
                i=$((i + 1))
            done
            printf '[1, 2]' > "$save/summary.json"
            ;;
    esac
    echo '{"event":"done"}'
done
"#;

struct Fixture {
    service: OcrService,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_script(FAKE_WORKER)
    }

    fn with_script(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_worker.sh");
        let log = dir.path().join("launches.log");
        std::fs::write(
            &script,
            format!("LAUNCH_LOG='{}'\n{body}", log.display()),
        )
        .unwrap();

        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();

        let config = PipelineConfig {
            use_gpu: false,
            command: vec!["sh".into(), script.to_string_lossy().into_owned()],
            staging_dir: Some(staging),
            ..PipelineConfig::default()
        };
        let service = OcrService::from_config(&config);
        Self { service, dir }
    }

    /// One line per worker start.
    fn launches(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("launches.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("staging")).unwrap().count()
    }
}

#[test]
fn test_pages_become_results() {
    let fx = Fixture::new();

    let output = fx.service.process_bytes(b"2", Some("doc.png")).unwrap();

    // Two pages plus the non-object summary file, which sorts last.
    assert_eq!(output.results.len(), 3);
    assert_eq!(output.results[0]["page_index"], 0);
    assert_eq!(output.results[1]["page_index"], 1);
    assert_eq!(
        output.results[1]["parsing_res_list"][0]["block_content"],
        "Hello"
    );
    assert_eq!(output.results[2]["value"], serde_json::json!([1, 2]));
    assert_eq!(output.report.fallbacks, 1);

    assert!(fx.service.status().initialized);
    assert_eq!(fx.staged_files(), 0);
}

#[test]
fn test_many_pages_keep_numeric_order() {
    let fx = Fixture::new();

    let output = fx.service.process_bytes(b"12", Some("doc.pdf")).unwrap();

    let order: Vec<i64> = output
        .results
        .iter()
        .filter_map(|r| r.get("page_index").and_then(|v| v.as_i64()))
        .collect();
    assert_eq!(order, (0..12).collect::<Vec<i64>>());
    assert!(output.results.last().unwrap().contains_key("value"));
}

#[test]
fn test_model_loaded_once_across_requests() {
    let fx = Fixture::new();
    assert!(fx.launches().is_empty());

    for pages in [b"1", b"3", b"2"] {
        fx.service.process_bytes(pages, Some("doc.png")).unwrap();
    }

    let launches = fx.launches();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].contains("--device cpu"));
    assert!(launches[0].contains("--enable_mkldnn True"));
}

#[test]
fn test_model_error_is_processing_failure() {
    let fx = Fixture::new();

    let err = fx.service.process_bytes(b"reject", Some("doc.png")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Processing);
    assert!(err.to_string().contains("layout model failed"));

    // Same worker keeps serving.
    fx.service.process_bytes(b"1", Some("doc.png")).unwrap();
    assert_eq!(fx.launches().len(), 1);
}

#[test]
fn test_worker_crash_fails_request_then_restarts() {
    let fx = Fixture::new();

    let err = fx.service.process_bytes(b"crash", Some("doc.png")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Processing);
    assert!(err.to_string().contains("exited"));
    assert!(fx.service.is_ready());
    assert_eq!(fx.staged_files(), 0);

    let output = fx.service.process_bytes(b"1", Some("doc.png")).unwrap();
    assert_eq!(output.results[0]["page_index"], 0);
    assert_eq!(fx.launches().len(), 2);
}

#[test]
fn test_invalid_output_is_processing_failure() {
    let fx = Fixture::new();

    let err = fx.service.process_bytes(b"garbage", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Processing);
}

#[test]
fn test_model_load_error_is_initialization_failure() {
    let fx = Fixture::with_script(
        "echo '{\"event\":\"error\",\"message\":\"paddle not compiled with CUDA\"}'\nexit 1\n",
    );

    let err = fx.service.process_bytes(b"1", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert!(err.to_string().contains("not compiled with CUDA"));
    assert!(!fx.service.is_ready());
}

#[test]
fn test_worker_exit_before_ready_is_initialization_failure() {
    let fx = Fixture::with_script("echo 'ImportError: No module named paddleocr' >&2\nexit 2\n");

    let err = fx.service.process_bytes(b"1", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert!(!fx.service.is_ready());
}
