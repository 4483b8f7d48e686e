//! Query planner (C6b): turns a `ParsedQuery` plus a shard set into a
//! `QueryPlan` of per-shard fetch targets.

use crate::parser::ParsedQuery;
use serde::Serialize;
use shardb_core::{Error, Result, ShardId};
use shardb_store::{FilterCondition, QueryOptions};

/// One shard's fetch instructions within a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ShardTarget {
    pub shard_id: ShardId,
    pub filters: Vec<FilterCondition>,
    pub options: QueryOptions,
}

/// A fan-out plan: which shards to hit, with what per-shard options, and
/// whether the results require a merge step afterward.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub targets: Vec<ShardTarget>,
    pub parallel: bool,
    pub requires_merge: bool,
    pub cost: f64,
}

fn estimate_cost(target_count: usize, requires_merge: bool, sort_keys: usize) -> f64 {
    target_count as f64
        * if requires_merge { 1.5 } else { 1.0 }
        * (1.0 + 0.2 * sort_keys as f64)
}

/// Builds a plan for `parsed` over `shards`. Rejects plans whose estimated
/// cost exceeds `max_cost`.
pub fn plan(parsed: &ParsedQuery, shards: &[ShardId], max_cost: f64) -> Result<QueryPlan> {
    let requires_merge = shards.len() > 1 || !parsed.options.sort.is_empty();
    let sort_keys = parsed.options.sort.len();
    let cost = estimate_cost(shards.len(), requires_merge, sort_keys);
    if cost > max_cost {
        return Err(Error::InvalidQuery(format!(
            "query plan cost {cost:.1} exceeds maximum {max_cost:.1}"
        )));
    }

    // Per-shard options: offset always applies post-merge; limit only
    // forwarded when no global sort is present (otherwise the merger needs
    // every candidate to sort correctly before slicing).
    let per_shard_options = QueryOptions {
        sort: Vec::new(),
        limit: if parsed.options.sort.is_empty() {
            parsed.options.limit
        } else {
            None
        },
        offset: 0,
    };

    let targets = shards
        .iter()
        .map(|shard_id| ShardTarget {
            shard_id: shard_id.clone(),
            filters: parsed.filters.clone(),
            options: per_shard_options.clone(),
        })
        .collect();

    Ok(QueryPlan {
        targets,
        parallel: true,
        requires_merge,
        cost,
    })
}

/// Splits a wide fan-out plan into chunks of at most `max_per_plan`
/// targets, each re-costed independently.
#[must_use]
pub fn split_plan(plan: QueryPlan, max_per_plan: usize) -> Vec<QueryPlan> {
    if max_per_plan == 0 || plan.targets.len() <= max_per_plan {
        return vec![plan];
    }

    let sort_keys = if plan.requires_merge {
        // Cost formula only needs key *count*; a split chunk keeps the same
        // per-shard options, so recover the count from any target's options.
        plan.targets
            .first()
            .map(|t| t.options.sort.len())
            .unwrap_or(0)
    } else {
        0
    };

    plan.targets
        .chunks(max_per_plan)
        .map(|chunk| {
            let targets = chunk.to_vec();
            let requires_merge = targets.len() > 1 || sort_keys > 0;
            let cost = estimate_cost(targets.len(), requires_merge, sort_keys);
            QueryPlan {
                targets,
                parallel: true,
                requires_merge,
                cost,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed() -> ParsedQuery {
        ParsedQuery {
            collection: "users".to_string(),
            filters: vec![],
            projection: None,
            options: QueryOptions::default(),
            aggregations: vec![],
        }
    }

    #[test]
    fn single_shard_does_not_require_merge() {
        let shards = vec![ShardId::new("shard-a")];
        let p = plan(&parsed(), &shards, 100.0).unwrap();
        assert!(!p.requires_merge);
        assert_eq!(p.cost, 1.0);
    }

    #[test]
    fn multi_shard_requires_merge_and_costs_more() {
        let shards = vec![ShardId::new("shard-a"), ShardId::new("shard-b")];
        let p = plan(&parsed(), &shards, 100.0).unwrap();
        assert!(p.requires_merge);
        assert_eq!(p.cost, 3.0);
    }

    #[test]
    fn plan_exceeding_max_cost_is_rejected() {
        let shards: Vec<ShardId> = (0..10).map(|i| ShardId::new(format!("shard-{i}"))).collect();
        assert!(plan(&parsed(), &shards, 5.0).is_err());
    }

    #[test]
    fn split_plan_chunks_wide_fanout() {
        let shards: Vec<ShardId> = (0..5).map(|i| ShardId::new(format!("shard-{i}"))).collect();
        let p = plan(&parsed(), &shards, 1000.0).unwrap();
        let chunks = split_plan(p, 2);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.targets.len() <= 2));
    }

    #[test]
    fn sorted_plan_omits_per_shard_limit() {
        let mut parsed = parsed();
        parsed.options.limit = Some(5);
        parsed.options.sort = vec![shardb_store::SortKey {
            field: "age".to_string(),
            ascending: true,
        }];
        let shards = vec![ShardId::new("shard-a")];
        let p = plan(&parsed, &shards, 100.0).unwrap();
        assert_eq!(p.targets[0].options.limit, None);
    }
}
