//! A small, closed lattice of column types and the widening rule used to
//! merge two independently-inferred types for the same column.
//!
//! This plays the role that `doc::shape::widen` plays for full JSON Schema
//! inference, but scoped down to the handful of scalar kinds a loader table
//! column can take.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    Double,
    Timestamp,
    String,
    /// Catch-all for nested arrays/objects; never silently widens into or
    /// out of another kind.
    Json,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "bigint",
            ColumnType::Double => "double",
            ColumnType::Timestamp => "timestamp",
            ColumnType::String => "string",
            ColumnType::Json => "json",
        };
        f.write_str(s)
    }
}

/// Outcome of widening two independently-observed types for one column.
pub enum Widen {
    /// The two types are identical, or one safely subsumes the other
    /// without requiring the caller to re-infer anything.
    Ok(ColumnType),
    /// The types are incomparable in the lattice. The caller must coerce
    /// its data against `suggested` and retry; merging them directly would
    /// lose information silently.
    Conflict { suggested: ColumnType },
}

/// Widens `existing` against `incoming`, the rule behind every
/// `column-coercion conflict`.
///
/// Only the numeric chain `Integer -> Double` widens silently: it is the one
/// case where two honest, independent readings of raw JSON numbers can
/// disagree (`1` vs `1.5`) without either side having done anything wrong.
/// Every other mismatch is a conflict: the two sides inferred fundamentally
/// different shapes for the same column and one of them must be recomputed
/// against the other's answer.
pub fn widen(existing: ColumnType, incoming: ColumnType) -> Widen {
    use ColumnType::*;
    if existing == incoming {
        return Widen::Ok(existing);
    }
    match (existing, incoming) {
        (Integer, Double) | (Double, Integer) => Widen::Ok(Double),
        _ => Widen::Conflict {
            suggested: ColumnType::String,
        },
    }
}

/// Infers the natural [`ColumnType`] of a JSON value, with no awareness of
/// any previously-established column type. Used for the first observation
/// of a column.
pub fn infer(value: &serde_json::Value) -> ColumnType {
    use serde_json::Value::*;
    match value {
        Bool(_) => ColumnType::Boolean,
        Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
        Number(_) => ColumnType::Double,
        String(_) => ColumnType::String,
        Array(_) | Object(_) => ColumnType::Json,
        Null => ColumnType::Json,
    }
}

/// Infers the type of `value` given that the column is already known (from a
/// schema snapshot) to hold `known`. This is what lets a retried worker
/// converge: rather than re-discovering a conflicting type, it renders the
/// value in terms of the type the rest of the schema has already settled on.
///
/// Returns `None` when `value` cannot honestly be represented as `known`
/// (e.g. a nested object can never become a bare string); the caller falls
/// back to [`infer`] and risks a further conflict.
pub fn coerce_to_known(known: ColumnType, value: &serde_json::Value) -> Option<ColumnType> {
    let natural = infer(value);
    if natural == known {
        return Some(known);
    }
    match widen(known, natural) {
        Widen::Ok(t) => Some(t),
        Widen::Conflict { .. } => match known {
            // A string column can always absorb any scalar by rendering it.
            ColumnType::String if !matches!(value, serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Some(ColumnType::String)
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_types_are_ok() {
        assert!(matches!(widen(ColumnType::String, ColumnType::String), Widen::Ok(ColumnType::String)));
    }

    #[test]
    fn integer_double_widens_silently() {
        assert!(matches!(widen(ColumnType::Integer, ColumnType::Double), Widen::Ok(ColumnType::Double)));
        assert!(matches!(widen(ColumnType::Double, ColumnType::Integer), Widen::Ok(ColumnType::Double)));
    }

    #[test]
    fn integer_string_conflicts() {
        assert!(matches!(
            widen(ColumnType::Integer, ColumnType::String),
            Widen::Conflict { suggested: ColumnType::String }
        ));
    }

    #[test]
    fn infer_matches_json_shape() {
        assert_eq!(infer(&serde_json::json!(1)), ColumnType::Integer);
        assert_eq!(infer(&serde_json::json!(1.5)), ColumnType::Double);
        assert_eq!(infer(&serde_json::json!("a")), ColumnType::String);
        assert_eq!(infer(&serde_json::json!(true)), ColumnType::Boolean);
        assert_eq!(infer(&serde_json::json!([1, 2])), ColumnType::Json);
    }

    #[test]
    fn coerce_to_known_string_absorbs_scalars() {
        assert_eq!(
            coerce_to_known(ColumnType::String, &serde_json::json!(42)),
            Some(ColumnType::String)
        );
    }

    #[test]
    fn coerce_to_known_string_refuses_nested() {
        assert_eq!(coerce_to_known(ColumnType::String, &serde_json::json!({"a": 1})), None);
    }
}
