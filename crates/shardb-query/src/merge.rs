//! Merge step: concatenate per-shard results, sum `total`, then apply the
//! global sort, projection, offset, and limit in that order.

use crate::executor::ShardFetchResult;
use serde_json::{Map, Value};
use shardb_core::Document;
use shardb_store::{sort_documents, QueryOptions};

/// The final, client-facing shape of a merged (and optionally projected)
/// query result.
#[derive(Debug, Clone)]
pub struct MergedResult {
    pub results: Vec<Value>,
    pub total: usize,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Merges `shard_results` per the executor contract: concatenate, sum
/// `total`, sort, project, then offset/limit.
#[must_use]
pub fn merge(
    shard_results: Vec<ShardFetchResult>,
    options: &QueryOptions,
    projection: Option<&[String]>,
) -> MergedResult {
    let total: usize = shard_results.iter().map(|r| r.total).sum();
    let mut docs: Vec<Document> = shard_results.into_iter().flat_map(|r| r.results).collect();

    sort_documents(&mut docs, &options.sort);

    let offset = options.offset.min(docs.len());
    let page: Vec<Document> = match options.limit {
        Some(limit) => docs.into_iter().skip(offset).take(limit).collect(),
        None => docs.into_iter().skip(offset).collect(),
    };

    let results = page
        .into_iter()
        .map(|doc| project(&doc, projection))
        .collect();

    MergedResult {
        results,
        total,
        limit: options.limit,
        offset: options.offset,
    }
}

/// Projects `doc` onto the requested dotted paths, always keeping reserved
/// fields. Undefined projected paths are simply elided from the output.
fn project(doc: &Document, projection: Option<&[String]>) -> Value {
    let Some(paths) = projection else {
        return doc.to_json();
    };

    let full = doc.to_json();
    let full_obj = full.as_object().expect("document always renders as an object");
    let mut out = Map::new();

    for key in ["_id", "_collection", "_version", "_createdAt", "_updatedAt"] {
        if let Some(v) = full_obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    for path in paths {
        if let Some(value) = doc.get_path(path) {
            set_path(&mut out, path, value.clone());
        }
    }

    Value::Object(out)
}

/// Materializes `value` at `path` inside `out`, creating intermediate
/// objects as needed.
fn set_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = out;
    while let Some(seg) = segments.next() {
        if segments.peek().is_none() {
            current.insert(seg.to_string(), value);
            return;
        }
        let entry = current
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("just ensured object");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardb_core::ShardId;
    use shardb_store::SortKey;

    fn doc(id: &str, age: i64) -> Document {
        Document {
            id: id.to_string(),
            collection: "users".to_string(),
            version: 1,
            created_at: 0,
            updated_at: 0,
            payload: json!({"age": age}).as_object().unwrap().clone(),
        }
    }

    #[test]
    fn merge_sums_total_and_sorts_globally() {
        let shard1 = ShardFetchResult {
            shard_id: ShardId::new("shard-1"),
            results: vec![doc("1", 25)],
            total: 1,
            error: None,
        };
        let shard2 = ShardFetchResult {
            shard_id: ShardId::new("shard-2"),
            results: vec![doc("2", 30)],
            total: 1,
            error: None,
        };
        let options = QueryOptions {
            sort: vec![SortKey {
                field: "age".to_string(),
                ascending: false,
            }],
            limit: Some(10),
            offset: 0,
        };

        let merged = merge(vec![shard1, shard2], &options, None);
        assert_eq!(merged.total, 2);
        assert_eq!(merged.results[0]["_id"], json!("2"));
        assert_eq!(merged.results[1]["_id"], json!("1"));
    }

    #[test]
    fn projection_keeps_reserved_and_elides_undefined() {
        let shard = ShardFetchResult {
            shard_id: ShardId::new("shard-1"),
            results: vec![doc("1", 25)],
            total: 1,
            error: None,
        };
        let options = QueryOptions::default();
        let merged = merge(vec![shard], &options, Some(&["age".to_string(), "missing".to_string()]));
        let result = &merged.results[0];
        assert_eq!(result["age"], json!(25));
        assert!(result.get("missing").is_none());
        assert!(result.get("_id").is_some());
    }
}
