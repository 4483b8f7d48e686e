//! Document domain type and dotted-path field access.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved keys the store owns; user payloads must not set them directly.
pub const RESERVED_KEYS: [&str; 5] = ["_id", "_collection", "_version", "_createdAt", "_updatedAt"];

/// A stored document: a (collection, id) pair plus monotonic version metadata
/// and an open-ended JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub payload: Map<String, Value>,
}

impl Document {
    /// Renders the document as the reserved-field-annotated JSON object
    /// returned to clients (`_id`, `_collection`, `_version`, ... plus the
    /// user payload fields merged in at the top level).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("_id".to_string(), Value::String(self.id.clone()));
        obj.insert(
            "_collection".to_string(),
            Value::String(self.collection.clone()),
        );
        obj.insert("_version".to_string(), Value::from(self.version));
        obj.insert("_createdAt".to_string(), Value::from(self.created_at));
        obj.insert("_updatedAt".to_string(), Value::from(self.updated_at));
        Value::Object(obj)
    }

    /// Serialized size of the payload only, in bytes.
    pub fn payload_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(&self.payload)?.len())
    }

    /// Reads a field by dotted path (`a.b.c`). Returns `None` ("undefined")
    /// when any segment of the path is absent.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self.payload.get(path.split('.').next()?)?;
        let mut segments = path.split('.');
        segments.next();
        for seg in segments {
            current = current.as_object()?.get(seg)?;
        }
        Some(current)
    }
}

/// Strips reserved keys from a user-supplied payload object, rejecting the
/// write if any reserved key is present (per `InvalidDocument`).
pub fn strip_reserved(payload: &Map<String, Value>) -> Result<Map<String, Value>> {
    for key in RESERVED_KEYS {
        if payload.contains_key(key) {
            return Err(Error::InvalidDocument(format!(
                "payload must not set reserved field `{key}`"
            )));
        }
    }
    Ok(payload.clone())
}

/// Validates a document id against `[A-Za-z0-9_.:-]{1,100}`.
pub fn validate_document_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 100
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "document id `{id}` does not match [A-Za-z0-9_.:-]{{1,100}}"
        )))
    }
}

/// Validates a collection name against `[A-Za-z0-9_]{1,50}`, must not start
/// with `__`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let charset_ok = !name.is_empty()
        && name.len() <= 50
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !charset_ok {
        return Err(Error::InvalidRequest(format!(
            "collection name `{name}` does not match [A-Za-z0-9_]{{1,50}}"
        )));
    }
    if name.starts_with("__") {
        return Err(Error::InvalidRequest(
            "collection name must not begin with `__`".to_string(),
        ));
    }
    Ok(())
}

/// Comparison operators supported by the filter/sort layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Evaluates `lhs OP rhs` under the "undefined never compares" rule: a
/// missing `lhs` makes every operator false except `!=`, which is true.
#[must_use]
pub fn compare(lhs: Option<&Value>, op: CompareOp, rhs: &Value) -> bool {
    match lhs {
        None => op == CompareOp::Ne,
        Some(lhs) => match op {
            CompareOp::Eq => values_equal(lhs, rhs),
            CompareOp::Ne => !values_equal(lhs, rhs),
            CompareOp::Gt => order(lhs, rhs) == Some(std::cmp::Ordering::Greater),
            CompareOp::Gte => matches!(
                order(lhs, rhs),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            CompareOp::Lt => order(lhs, rhs) == Some(std::cmp::Ordering::Less),
            CompareOp::Lte => matches!(
                order(lhs, rhs),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Total order over comparable JSON scalars (numbers, strings); returns
/// `None` for types that have no natural order (bools, arrays, objects,
/// null) so comparisons against them are always false.
fn order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
