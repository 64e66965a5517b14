use std::fmt::Write as _;

use serde_json::Value;

use crate::types::NormalizedResult;

/// Render normalized results as a simple markdown report: one section per
/// element, one bold key per top-level field.
pub fn render_markdown(results: &[NormalizedResult]) -> String {
    let mut out = String::from("# Document OCR Results\n");

    for (idx, result) in results.iter().enumerate() {
        let _ = write!(out, "\n## Element {}\n", idx + 1);
        for (key, value) in result {
            let _ = writeln!(out, "**{key}**: {}", display_value(value));
        }
    }

    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
