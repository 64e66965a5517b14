//! Synthetic raw units shared by the benchmarks.

use docvl_core::{OpaqueValue, RawUnit};
use serde_json::json;

/// A page-shaped self-describing unit with `blocks` layout blocks.
pub fn page_unit(index: usize, blocks: usize) -> RawUnit {
    let blocks: Vec<_> = (0..blocks)
        .map(|i| {
            json!({
                "block_label": "text",
                "block_content": format!("line {i} of page {index}"),
                "block_bbox": [10, 20 * i, 600, 20 * i + 18],
            })
        })
        .collect();
    RawUnit::from_json(
        format!("page_{index}.json"),
        json!({"page_index": index, "width": 1240, "height": 1754, "parsing_res_list": blocks}),
    )
}

/// An opaque object graph of the same rough size, forcing the structural
/// fallback.
pub fn opaque_unit(index: usize, blocks: usize) -> RawUnit {
    let blocks = (0..blocks)
        .map(|i| {
            OpaqueValue::object(
                "LayoutBlock",
                vec![
                    ("label".to_string(), OpaqueValue::from("text")),
                    ("content".to_string(), OpaqueValue::from(format!("line {i}"))),
                    ("score".to_string(), OpaqueValue::from(0.97)),
                    ("_cache".to_string(), OpaqueValue::Null),
                    ("render".to_string(), OpaqueValue::callable("render")),
                ],
            )
        })
        .collect();
    RawUnit::Opaque(OpaqueValue::object(
        "PageResult",
        vec![
            ("page_index".to_string(), OpaqueValue::from(index as i64)),
            ("blocks".to_string(), OpaqueValue::Sequence(blocks)),
        ],
    ))
}
