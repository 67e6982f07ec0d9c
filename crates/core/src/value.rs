//! Property value union
//!
//! `PropertyValue` is the tagged variant carried by documents and index
//! fields. All conversions from raw bundle text go through
//! [`PropertyValue::try_from_raw`], which implements the numeric fallback
//! chain: scalar cast first, then multi-value separators in priority order
//! `-`, `~`, `,`, and for integers a final float-cast-and-truncate attempt.

use crate::error::{EngineError, EngineResult};
use crate::schema::PropertyKind;
use crate::types;
use serde::{Deserialize, Serialize};

/// Separators probed, in priority order, when a scalar numeric cast fails.
const MULTI_VALUE_SEPARATORS: [char; 3] = ['-', '~', ','];

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// UTF-8 text (also used for nominal and canonicalized date values).
    Text(String),
    /// Scalar 64-bit integer.
    Int(i64),
    /// Scalar 64-bit float.
    Float(f64),
    /// Multi-valued integers.
    IntList(Vec<i64>),
    /// Multi-valued floats.
    FloatList(Vec<f64>),
    /// Multi-valued text.
    TextList(Vec<String>),
    /// Sentence offset blocks: flat `[start, end, ...]` character offsets.
    Blocks(Vec<u32>),
}

impl PropertyValue {
    /// Convert raw bundle text into a typed value for the given kind.
    ///
    /// - `String` / `Nominal` yield `Text`.
    /// - `Date` parses the compact `YYYYMMDDhhmmss` form and yields the
    ///   canonicalized `Text`.
    /// - `Int` / `Float` try a scalar cast, then each separator, then (for
    ///   `Int`) a float cast truncated toward zero.
    pub fn try_from_raw(raw: &str, kind: PropertyKind) -> EngineResult<PropertyValue> {
        match kind {
            PropertyKind::String | PropertyKind::Nominal => {
                Ok(PropertyValue::Text(raw.to_string()))
            }
            PropertyKind::Date => {
                let seconds = types::parse_compact_date(raw)?;
                Ok(PropertyValue::Text(types::compact_date_string(seconds)))
            }
            PropertyKind::Int => parse_int(raw),
            PropertyKind::Float => parse_float(raw),
        }
    }

    /// Split comma-separated raw text for a declared multi-value property.
    pub fn text_list(raw: &str) -> PropertyValue {
        PropertyValue::TextList(
            raw.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        )
    }

    /// The value as text, when it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a scalar integer, when it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a scalar float, when it is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical text rendering used for R-type change comparison.
    pub fn compare_text(&self) -> String {
        match self {
            PropertyValue::Text(s) => s.clone(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::IntList(vs) => vs
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            PropertyValue::FloatList(vs) => vs
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            PropertyValue::TextList(vs) => vs.join(","),
            PropertyValue::Blocks(vs) => vs
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

fn parse_int(raw: &str) -> EngineResult<PropertyValue> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(PropertyValue::Int(v));
    }
    for sep in MULTI_VALUE_SEPARATORS {
        if let Some(values) = split_numeric::<i64>(trimmed, sep) {
            return Ok(PropertyValue::IntList(values));
        }
    }
    // Last resort: float cast truncated toward zero.
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(PropertyValue::Int(v as i64));
    }
    Err(EngineError::bad_format(format!(
        "'{}' is not an integer value",
        raw
    )))
}

fn parse_float(raw: &str) -> EngineResult<PropertyValue> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(PropertyValue::Float(v));
    }
    for sep in MULTI_VALUE_SEPARATORS {
        if let Some(values) = split_numeric::<f64>(trimmed, sep) {
            return Ok(PropertyValue::FloatList(values));
        }
    }
    Err(EngineError::bad_format(format!(
        "'{}' is not a float value",
        raw
    )))
}

/// Split on `sep` and parse every piece; `None` when the separator is absent
/// or any piece fails to parse, so the next separator gets a chance.
fn split_numeric<T: std::str::FromStr>(raw: &str, sep: char) -> Option<Vec<T>> {
    if !raw.contains(sep) {
        return None;
    }
    raw.split(sep)
        .map(|p| p.trim().parse::<T>().ok())
        .collect::<Option<Vec<T>>>()
        .filter(|vs| !vs.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_int() {
        let v = PropertyValue::try_from_raw("42", PropertyKind::Int).unwrap();
        assert_eq!(v, PropertyValue::Int(42));
    }

    #[test]
    fn negative_int_is_scalar_not_range() {
        // "-5" parses as a scalar before the '-' separator is probed
        let v = PropertyValue::try_from_raw("-5", PropertyKind::Int).unwrap();
        assert_eq!(v, PropertyValue::Int(-5));
    }

    #[test]
    fn int_separator_priority() {
        assert_eq!(
            PropertyValue::try_from_raw("3-5", PropertyKind::Int).unwrap(),
            PropertyValue::IntList(vec![3, 5])
        );
        assert_eq!(
            PropertyValue::try_from_raw("3~5", PropertyKind::Int).unwrap(),
            PropertyValue::IntList(vec![3, 5])
        );
        assert_eq!(
            PropertyValue::try_from_raw("3,5,7", PropertyKind::Int).unwrap(),
            PropertyValue::IntList(vec![3, 5, 7])
        );
    }

    #[test]
    fn int_falls_back_to_float_truncation() {
        let v = PropertyValue::try_from_raw("12.9", PropertyKind::Int).unwrap();
        assert_eq!(v, PropertyValue::Int(12));
    }

    #[test]
    fn int_rejects_text() {
        assert!(PropertyValue::try_from_raw("cheap", PropertyKind::Int).is_err());
    }

    #[test]
    fn float_separator_fallback() {
        assert_eq!(
            PropertyValue::try_from_raw("1.5~2.5", PropertyKind::Float).unwrap(),
            PropertyValue::FloatList(vec![1.5, 2.5])
        );
    }

    #[test]
    fn date_canonicalizes() {
        let v = PropertyValue::try_from_raw(" 20091009163011 ", PropertyKind::Date).unwrap();
        assert_eq!(v, PropertyValue::Text("20091009163011".to_string()));
    }

    #[test]
    fn text_list_splits_and_trims() {
        assert_eq!(
            PropertyValue::text_list("a, b ,c,"),
            PropertyValue::TextList(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn compare_text_roundtrips_lists() {
        let v = PropertyValue::IntList(vec![3, 5]);
        assert_eq!(v.compare_text(), "3,5");
    }
}
