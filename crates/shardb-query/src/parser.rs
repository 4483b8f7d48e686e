//! Query parser (C6a): validates a raw query request into a `ParsedQuery`.

use crate::aggregator::AggregationSpec;
use serde::{Deserialize, Serialize};
use shardb_core::{validate_collection_name, Error, Result};
use shardb_store::{FilterCondition, QueryOptions};

/// A validated, ready-to-plan query.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuery {
    pub collection: String,
    pub filters: Vec<FilterCondition>,
    pub projection: Option<Vec<String>>,
    pub options: QueryOptions,
    pub aggregations: Vec<AggregationSpec>,
}

/// The raw shape of a `POST /api/data/{collection}` request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQueryRequest {
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
}

/// Validates `request` against `collection`, producing a `ParsedQuery`.
///
/// Logical-OR and set/text operator extension points named in the original
/// design are intentionally not exposed here: every filter is ANDed, as
/// `FilterCondition` carries no logical operator field.
pub fn parse(collection: &str, request: RawQueryRequest) -> Result<ParsedQuery> {
    validate_collection_name(collection)?;

    for filter in &request.filters {
        if filter.field.is_empty() {
            return Err(Error::InvalidQuery("filter field must be non-empty".to_string()));
        }
    }

    if let Some(projection) = &request.projection {
        for path in projection {
            if path.is_empty() {
                return Err(Error::InvalidQuery(
                    "projection path must be non-empty".to_string(),
                ));
            }
        }
    }

    for key in &request.options.sort {
        if key.field.is_empty() {
            return Err(Error::InvalidQuery("sort field must be non-empty".to_string()));
        }
    }

    Ok(ParsedQuery {
        collection: collection.to_string(),
        filters: request.filters,
        projection: request.projection,
        options: request.options,
        aggregations: request.aggregations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardb_core::CompareOp;
    use shardb_store::SortKey;

    #[test]
    fn valid_request_parses() {
        let request = RawQueryRequest {
            filters: vec![FilterCondition {
                field: "age".to_string(),
                op: CompareOp::Gt,
                value: json!(21),
            }],
            projection: Some(vec!["name".to_string()]),
            options: QueryOptions {
                sort: vec![SortKey {
                    field: "age".to_string(),
                    ascending: true,
                }],
                limit: Some(10),
                offset: 0,
            },
            aggregations: vec![],
        };
        let parsed = parse("users", request).unwrap();
        assert_eq!(parsed.collection, "users");
        assert_eq!(parsed.filters.len(), 1);
    }

    #[test]
    fn empty_filter_field_is_rejected() {
        let request = RawQueryRequest {
            filters: vec![FilterCondition {
                field: String::new(),
                op: CompareOp::Eq,
                value: json!(1),
            }],
            ..Default::default()
        };
        assert!(matches!(parse("users", request), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn bad_collection_name_is_rejected() {
        let request = RawQueryRequest::default();
        assert!(parse("__system", request).is_err());
    }
}
