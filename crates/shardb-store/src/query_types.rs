//! Filter/sort/pagination types shared by the per-shard `QUERY` operation
//! and the cross-shard query pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardb_core::{Document, CompareOp};

/// One leaf predicate: `field OP value`, ANDed together with its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl FilterCondition {
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        shardb_core::compare(doc.get_path(&self.field), self.op, &self.value)
    }
}

/// One sort key; ties fall through to the next key in the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// Pagination + sort options for a `QUERY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Result of a per-shard (or merged, post-aggregation) `QUERY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub results: Vec<Document>,
    /// Post-filter, pre-pagination count.
    pub total: usize,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Applies AND-semantics filters, then sort, then offset/limit — the
/// reference evaluation every `QUERY` implementation (shard-local or
/// merged) must be equivalent to.
#[must_use]
pub fn apply_filters_sort_page(
    mut docs: Vec<Document>,
    filters: &[FilterCondition],
    options: &QueryOptions,
) -> QueryResult {
    docs.retain(|doc| filters.iter().all(|f| f.matches(doc)));
    let total = docs.len();

    sort_documents(&mut docs, &options.sort);

    let offset = options.offset.min(docs.len());
    let page: Vec<Document> = match options.limit {
        Some(limit) => docs.into_iter().skip(offset).take(limit).collect(),
        None => docs.into_iter().skip(offset).collect(),
    };

    QueryResult {
        results: page,
        total,
        limit: options.limit,
        offset: options.offset,
    }
}

/// Sorts `docs` in place by `sort`, first key primary, ties falling through
/// to the next key; stable so untouched relative order survives when
/// `sort` is empty or all keys tie.
pub fn sort_documents(docs: &mut [Document], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in sort {
            let av = a.get_path(&key.field);
            let bv = b.get_path(&key.field);
            let ord = compare_values(av, bv);
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Orders two optional field values using the document sort total order:
/// undefined sorts before any defined value so ties fall through
/// deterministically rather than panicking on incomparable types.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => a.cmp(b),
                _ => Ordering::Equal,
            },
        },
    }
}
