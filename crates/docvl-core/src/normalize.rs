//! Result normalization: raw inference units → JSON-safe mappings.
//!
//! A unit that can describe itself is trusted verbatim. Anything else goes
//! through a depth-bounded structural visitor over [`OpaqueValue`]:
//!
//! - null and scalars pass through unchanged,
//! - sequences map element-wise, order preserved,
//! - mappings and attributed objects map key-wise, dropping callables and
//!   (for objects) `_`-prefixed names,
//! - foreign values are JSON-encoded when they can be, and described as a
//!   string otherwise.
//!
//! Taking the fallback is logged as a warning: it means the model's result
//! shape no longer matches what this service was written against.

use serde_json::{Map, Number, Value};

use crate::error::BoxError;
use crate::types::{NormalizedResult, OpaqueValue, RawUnit};

/// Nesting limit for the structural fallback.
pub const MAX_DEPTH: usize = 64;

/// Substituted for any value at or beyond [`MAX_DEPTH`].
pub const DEPTH_PLACEHOLDER: &str = "<max depth exceeded>";

/// Counters describing one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    pub units: usize,
    pub fallbacks: usize,
}

/// Normalize a single unit. Returns the mapping and whether the structural
/// fallback was used.
pub fn normalize_unit(unit: &RawUnit) -> Result<(NormalizedResult, bool), BoxError> {
    match unit {
        RawUnit::SelfDescribing(unit) => Ok((unit.to_json()?, false)),
        RawUnit::Opaque(value) => {
            tracing::warn!(
                unit_type = value.type_name(),
                "unit has no self-description, using structural fallback"
            );
            let result = match convert(value, 0) {
                Some(Value::Object(map)) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other.unwrap_or(Value::Null));
                    map
                }
            };
            Ok((result, true))
        }
    }
}

/// Normalize every unit in order. The first self-description failure aborts
/// the pass.
pub fn normalize_units(
    units: &[RawUnit],
) -> Result<(Vec<NormalizedResult>, NormalizationReport), BoxError> {
    let mut report = NormalizationReport {
        units: units.len(),
        fallbacks: 0,
    };
    let mut results = Vec::with_capacity(units.len());

    for unit in units {
        let (result, fallback) = normalize_unit(unit)?;
        if fallback {
            report.fallbacks += 1;
        }
        results.push(result);
    }

    Ok((results, report))
}

/// Structural conversion. `None` means the value has no JSON representation
/// and should be omitted (callables).
fn convert(value: &OpaqueValue, depth: usize) -> Option<Value> {
    if depth >= MAX_DEPTH {
        return Some(Value::String(DEPTH_PLACEHOLDER.to_string()));
    }

    match value {
        OpaqueValue::Null => Some(Value::Null),
        OpaqueValue::Bool(b) => Some(Value::Bool(*b)),
        OpaqueValue::Int(i) => Some(Value::Number((*i).into())),
        // NaN and infinities have no JSON form.
        OpaqueValue::Float(f) => Some(Number::from_f64(*f).map_or(Value::Null, Value::Number)),
        OpaqueValue::Str(s) => Some(Value::String(s.clone())),
        OpaqueValue::Sequence(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| convert(item, depth + 1).unwrap_or(Value::Null))
                .collect(),
        )),
        OpaqueValue::Mapping(entries) => Some(Value::Object(convert_entries(
            entries.iter().map(|(k, v)| (k, v)),
            depth,
        ))),
        OpaqueValue::Object { attributes, .. } => Some(Value::Object(convert_entries(
            attributes
                .iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .map(|(k, v)| (k, v)),
            depth,
        ))),
        OpaqueValue::Callable { .. } => None,
        OpaqueValue::Foreign(foreign) => Some(
            foreign
                .encode_json()
                .unwrap_or_else(|| Value::String(foreign.describe())),
        ),
    }
}

fn convert_entries<'a>(
    entries: impl Iterator<Item = (&'a String, &'a OpaqueValue)>,
    depth: usize,
) -> Map<String, Value> {
    entries
        .filter(|(_, v)| !v.is_callable())
        .filter_map(|(k, v)| convert(v, depth + 1).map(|v| (k.clone(), v)))
        .collect()
}
