//! Aggregator (C6d): COUNT/SUM/AVG/MIN/MAX/GROUP_BY over a merged result set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardb_core::Document;
use std::collections::BTreeMap;

/// A single aggregation request, tagged on the wire by `op`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "op")]
pub enum AggregationSpec {
    COUNT {
        #[serde(default)]
        field: Option<String>,
    },
    SUM {
        field: String,
    },
    AVG {
        field: String,
    },
    MIN {
        field: String,
    },
    MAX {
        field: String,
    },
    GROUP_BY {
        fields: Vec<String>,
    },
}

/// Result of one aggregation spec, shaped to match the wire response.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Map<String, Value>>,
}

fn numeric_values(docs: &[Document], field: &str) -> Vec<f64> {
    docs.iter()
        .filter_map(|d| d.get_path(field))
        .filter_map(Value::as_f64)
        .collect()
}

/// Applies every spec in `specs` over `docs`, in order.
#[must_use]
pub fn aggregate(docs: &[Document], specs: &[AggregationSpec]) -> Vec<AggregationResult> {
    specs.iter().map(|spec| aggregate_one(docs, spec)).collect()
}

fn aggregate_one(docs: &[Document], spec: &AggregationSpec) -> AggregationResult {
    match spec {
        AggregationSpec::COUNT { field } => {
            let value = match field {
                None => docs.len(),
                Some(field) => docs.iter().filter(|d| d.get_path(field).is_some()).count(),
            };
            AggregationResult {
                op: "COUNT",
                field: field.clone(),
                value: Value::from(value),
                groups: None,
            }
        }
        AggregationSpec::SUM { field } => {
            let sum: f64 = numeric_values(docs, field).into_iter().sum();
            AggregationResult {
                op: "SUM",
                field: Some(field.clone()),
                value: Value::from(sum),
                groups: None,
            }
        }
        AggregationSpec::AVG { field } => {
            let values = numeric_values(docs, field);
            let avg = if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            AggregationResult {
                op: "AVG",
                field: Some(field.clone()),
                value: Value::from(avg),
                groups: None,
            }
        }
        AggregationSpec::MIN { field } => {
            let value = numeric_values(docs, field)
                .into_iter()
                .fold(None, |acc: Option<f64>, v| match acc {
                    Some(a) if a <= v => Some(a),
                    _ => Some(v),
                });
            AggregationResult {
                op: "MIN",
                field: Some(field.clone()),
                value: value.map(Value::from).unwrap_or(Value::Null),
                groups: None,
            }
        }
        AggregationSpec::MAX { field } => {
            let value = numeric_values(docs, field)
                .into_iter()
                .fold(None, |acc: Option<f64>, v| match acc {
                    Some(a) if a >= v => Some(a),
                    _ => Some(v),
                });
            AggregationResult {
                op: "MAX",
                field: Some(field.clone()),
                value: value.map(Value::from).unwrap_or(Value::Null),
                groups: None,
            }
        }
        AggregationSpec::GROUP_BY { fields } => {
            let mut groups: BTreeMap<String, (Vec<Value>, Vec<&Document>)> = BTreeMap::new();
            for doc in docs {
                let key_values: Vec<Value> = fields
                    .iter()
                    .map(|f| doc.get_path(f).cloned().unwrap_or(Value::Null))
                    .collect();
                let key = key_values
                    .iter()
                    .map(value_to_group_key)
                    .collect::<Vec<_>>()
                    .join("\u{1}");
                let entry = groups.entry(key).or_insert_with(|| (key_values, Vec::new()));
                entry.1.push(doc);
            }

            let mut rendered = Map::new();
            for (key, (key_values, members)) in &groups {
                let label = key.split('\u{1}').collect::<Vec<_>>().join(",");
                let mut group_obj = Map::new();
                for (field, value) in fields.iter().zip(key_values) {
                    group_obj.insert(field.clone(), value.clone());
                }
                group_obj.insert("count".to_string(), Value::from(members.len()));
                group_obj.insert(
                    "documents".to_string(),
                    Value::Array(members.iter().map(|d| d.to_json()).collect()),
                );
                rendered.insert(label, Value::Object(group_obj));
            }

            AggregationResult {
                op: "GROUP_BY",
                field: None,
                value: Value::from(groups.len()),
                groups: Some(rendered),
            }
        }
    }
}

fn value_to_group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
