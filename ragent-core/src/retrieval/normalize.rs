//! Normalization of vector-search results into [`CanonicalRecord`]s.
//!
//! Backends and client versions disagree on how a result collection looks:
//! a bare list of points, a `(points, next_offset)` pair, or an envelope object
//! with a `points` field. Each point in turn may be a full record, a loose
//! mapping, or a positional `[id, score, payload]` tuple. The shape is resolved
//! once here so the rest of the pipeline sees a single record type.

use crate::state::{CanonicalRecord, RecordId};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// How a raw search response carries its points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseShape<'a> {
    /// `[points, next_page_offset]`: the first element is the point list.
    Tuple(&'a [Value]),
    /// An object with a `points` array (or `result.points`, or `result` as a list).
    Attribute(&'a [Value]),
    /// A plain list of points.
    List(&'a [Value]),
    Unknown,
}

impl<'a> ResponseShape<'a> {
    /// Classify a raw response. Checked in priority order: tuple, attribute, list.
    pub fn classify(raw: &'a Value) -> Self {
        match raw {
            Value::Array(items) => match items.as_slice() {
                [Value::Array(first)] | [Value::Array(first), _]
                    if is_point_collection(first) && is_page_offset(items.get(1)) =>
                {
                    ResponseShape::Tuple(first.as_slice())
                }
                _ => ResponseShape::List(items.as_slice()),
            },
            Value::Object(map) => match attribute_points(map) {
                Some(points) => ResponseShape::Attribute(points),
                None => ResponseShape::Unknown,
            },
            _ => ResponseShape::Unknown,
        }
    }

    /// The point items, or `None` for an unknown shape.
    pub fn points(&self) -> Option<&'a [Value]> {
        match *self {
            ResponseShape::Tuple(points)
            | ResponseShape::Attribute(points)
            | ResponseShape::List(points) => Some(points),
            ResponseShape::Unknown => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResponseShape::Tuple(_) => "tuple",
            ResponseShape::Attribute(_) => "attribute",
            ResponseShape::List(_) => "list",
            ResponseShape::Unknown => "unknown",
        }
    }
}

/// A list whose items look like points (empty counts).
fn is_point_collection(items: &[Value]) -> bool {
    matches!(
        items.first(),
        None | Some(Value::Object(_)) | Some(Value::Array(_))
    )
}

/// The second slot of a `(points, next_page_offset)` pair: absent, null, or a
/// scalar id. A nested array or object there means the outer list is itself a
/// list of points.
fn is_page_offset(slot: Option<&Value>) -> bool {
    !matches!(slot, Some(Value::Array(_)) | Some(Value::Object(_)))
}

fn attribute_points(map: &Map<String, Value>) -> Option<&[Value]> {
    if let Some(Value::Array(points)) = map.get("points") {
        return Some(points);
    }
    match map.get("result") {
        Some(Value::Object(inner)) => match inner.get("points") {
            Some(Value::Array(points)) => Some(points),
            _ => None,
        },
        Some(Value::Array(points)) => Some(points),
        _ => None,
    }
}

/// How a single point is encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointShape<'a> {
    /// An object carrying an explicit `id`.
    Record(&'a Map<String, Value>),
    /// An object without `id`; the position stands in for it.
    Mapping(&'a Map<String, Value>),
    /// `[id, score, payload]`, any trailing slot may be missing.
    Positional(&'a [Value]),
    Unrecognized,
}

impl<'a> PointShape<'a> {
    pub fn classify(item: &'a Value) -> Self {
        match item {
            Value::Object(map) if map.contains_key("id") => PointShape::Record(map),
            Value::Object(map) => PointShape::Mapping(map),
            Value::Array(slots) => PointShape::Positional(slots),
            _ => PointShape::Unrecognized,
        }
    }

    /// Build the canonical record, or `None` when the item is unrecognized.
    pub fn into_record(self, index: usize) -> Option<CanonicalRecord> {
        let (id, score, payload) = match self {
            PointShape::Record(map) | PointShape::Mapping(map) => {
                (map.get("id"), map.get("score"), map.get("payload"))
            }
            PointShape::Positional(slots) => (slots.first(), slots.get(1), slots.get(2)),
            PointShape::Unrecognized => return None,
        };
        Some(CanonicalRecord::new(
            coerce_id(id, index),
            coerce_score(score),
            coerce_payload(payload),
        ))
    }
}

fn coerce_id(value: Option<&Value>, index: usize) -> RecordId {
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => RecordId::Num(n),
            None => RecordId::from(index),
        },
        Some(Value::String(s)) => RecordId::Text(s.clone()),
        _ => RecordId::from(index),
    }
}

fn coerce_score(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|score| score.is_finite())
        .unwrap_or(0.0)
}

fn coerce_payload(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Convert a raw search response into canonical records, preserving order.
///
/// Never fails: an unknown response shape yields an empty list and
/// unrecognized items are skipped, both with a warning.
pub fn normalize(raw: &Value) -> Vec<CanonicalRecord> {
    let shape = ResponseShape::classify(raw);
    let Some(points) = shape.points() else {
        warn!(
            kind = json_kind(raw),
            "Unrecognized search response shape, treating as empty"
        );
        return Vec::new();
    };
    debug!(shape = shape.label(), items = points.len(), "Normalizing search response");

    points
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let record = PointShape::classify(item).into_record(index);
            if record.is_none() {
                warn!(index, kind = json_kind(item), "Skipping unrecognized search result item");
            }
            record
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn docling_points() -> Value {
        json!([
            {"id": 1, "score": 0.95, "payload": {"content": "Docling converts PDFs.", "source": "a.pdf"}},
            {"id": "b7", "score": 0.87, "payload": {"content": "Docling exports Markdown."}}
        ])
    }

    #[test]
    fn test_plain_list_of_records() {
        let records = normalize(&docling_points());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, RecordId::Num(1));
        assert_eq!(records[0].score, 0.95);
        assert_eq!(records[0].content(), Some("Docling converts PDFs."));
        assert_eq!(records[1].id, RecordId::Text("b7".into()));
    }

    #[test]
    fn test_tuple_with_next_offset() {
        let raw = json!([docling_points(), 42]);
        assert!(matches!(ResponseShape::classify(&raw), ResponseShape::Tuple(_)));
        let records = normalize(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].score, 0.87);
    }

    #[test]
    fn test_tuple_with_empty_points() {
        let raw = json!([[], null]);
        assert!(matches!(ResponseShape::classify(&raw), ResponseShape::Tuple(_)));
        assert!(normalize(&raw).is_empty());
    }

    #[test]
    fn test_list_of_positional_tuples_is_not_a_tuple_response() {
        let raw = json!([[3, 0.5, {"content": "x"}], [4, 0.4]]);
        assert!(matches!(ResponseShape::classify(&raw), ResponseShape::List(_)));
        let records = normalize(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, RecordId::Num(3));
        assert_eq!(records[0].content(), Some("x"));
        assert_eq!(records[1].score, 0.4);
        assert!(records[1].payload.is_empty());
    }

    #[test]
    fn test_empty_leading_positional_point_is_not_a_tuple_response() {
        let raw = json!([[], [2, 0.3, {"content": "x"}]]);
        assert!(matches!(ResponseShape::classify(&raw), ResponseShape::List(_)));
        let records = normalize(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, RecordId::Num(0));
        assert_eq!(records[1].id, RecordId::Num(2));
        assert_eq!(records[1].content(), Some("x"));
    }

    #[test]
    fn test_tuple_needs_a_pair() {
        let raw = json!([docling_points(), "next", 3]);
        assert!(matches!(ResponseShape::classify(&raw), ResponseShape::List(_)));

        let raw = json!([docling_points(), "a1b2"]);
        assert_eq!(normalize(&raw).len(), 2);
    }

    #[test]
    fn test_object_with_points() {
        let raw = json!({"points": docling_points(), "time": 0.002});
        let records = normalize(&raw);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_qdrant_envelope() {
        let raw = json!({"result": {"points": docling_points()}, "status": "ok"});
        assert_eq!(normalize(&raw).len(), 2);

        let raw = json!({"result": docling_points(), "status": "ok"});
        assert_eq!(normalize(&raw).len(), 2);
    }

    #[test]
    fn test_unknown_shapes_yield_empty() {
        assert!(normalize(&json!(null)).is_empty());
        assert!(normalize(&json!("points")).is_empty());
        assert!(normalize(&json!({"status": "ok"})).is_empty());
        assert!(normalize(&json!({"points": "not a list"})).is_empty());
    }

    #[test]
    fn test_mapping_defaults_id_to_position() {
        let raw = json!([
            {"id": 9, "score": 0.9},
            {"score": 0.8, "payload": {"content": "no id"}}
        ]);
        let records = normalize(&raw);
        assert_eq!(records[1].id, RecordId::Num(1));
        assert_eq!(records[1].content(), Some("no id"));
    }

    #[test]
    fn test_missing_and_bad_fields_default() {
        let raw = json!([
            {"id": 1},
            {"id": 2, "score": "high", "payload": ["not", "a", "map"]},
            {"id": {"nested": true}, "score": 0.3},
            {"id": 1.5, "score": null}
        ]);
        let records = normalize(&raw);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].score, 0.0);
        assert!(records[0].payload.is_empty());
        assert_eq!(records[1].score, 0.0);
        assert!(records[1].payload.is_empty());
        assert_eq!(records[2].id, RecordId::Num(2));
        assert_eq!(records[3].id, RecordId::Num(3));
    }

    #[test]
    fn test_unrecognized_items_are_skipped() {
        let raw = json!([{"id": 1, "score": 0.5}, "garbage", 17, null, [2, 0.1]]);
        let records = normalize(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, RecordId::Num(1));
        assert_eq!(records[1].id, RecordId::Num(2));
    }

    #[test]
    fn test_order_is_preserved_not_reranked() {
        let raw = json!([
            {"id": 1, "score": 0.1},
            {"id": 2, "score": 0.9},
            {"id": 3, "score": 0.5}
        ]);
        let ids: Vec<_> = normalize(&raw).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RecordId::Num(1), RecordId::Num(2), RecordId::Num(3)]);
    }

    #[test]
    fn test_point_shape_classification() {
        let record = json!({"id": 1});
        let mapping = json!({"score": 1.0});
        let positional = json!([1, 0.5]);
        let other = json!(true);
        assert!(matches!(PointShape::classify(&record), PointShape::Record(_)));
        assert!(matches!(PointShape::classify(&mapping), PointShape::Mapping(_)));
        assert!(matches!(PointShape::classify(&positional), PointShape::Positional(_)));
        assert_eq!(PointShape::classify(&other), PointShape::Unrecognized);
        assert!(PointShape::Unrecognized.into_record(0).is_none());
    }
}
