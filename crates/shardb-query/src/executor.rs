//! Query executor (C6c): scatter-gather dispatch of a `QueryPlan` with
//! per-shard retry/backoff, a global timeout, and a `continueOnError`
//! policy, grounded on the concurrency shape of
//! `akidb-query/src/distributed.rs::QueryCoordinator::query`
//! (`tokio::spawn` fan-out bounded by a `Semaphore`).

use crate::planner::{QueryPlan, ShardTarget};
use async_trait::async_trait;
use shardb_core::{Document, Error, Result, ShardId, ShardbConfig};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// One shard's fetch outcome: either documents + pre-pagination count, or
/// the error that survived every retry.
#[derive(Debug, Clone)]
pub struct ShardFetchResult {
    pub shard_id: ShardId,
    pub results: Vec<Document>,
    pub total: usize,
    pub error: Option<String>,
}

/// Dispatches a single shard's portion of a query. Implementations should
/// surface transient failures as `Err` so the executor's retry loop can
/// act on them; a fetcher need not retry internally.
#[async_trait]
pub trait ShardFetcher: Send + Sync {
    async fn fetch(&self, target: &ShardTarget) -> Result<ShardFetchResult>;
}

/// Runs `plan` to completion against `fetcher`, honoring `config`'s
/// timeout/retry/backoff settings. `continue_on_error` mirrors the
/// `continueOnError` request option (default true upstream).
pub async fn execute(
    plan: &QueryPlan,
    fetcher: Arc<dyn ShardFetcher>,
    config: &ShardbConfig,
    continue_on_error: bool,
) -> Result<Vec<ShardFetchResult>> {
    let semaphore = Arc::new(Semaphore::new(plan.targets.len().max(1)));
    let mut handles = Vec::with_capacity(plan.targets.len());

    let max_retries = config.max_retries;
    let retry_backoff_ms = config.retry_backoff_ms;

    for target in &plan.targets {
        let target = target.clone();
        let fetcher = fetcher.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            fetch_with_retry(&target, fetcher.as_ref(), max_retries, retry_backoff_ms).await
        }));
    }

    let gather = async {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => {
                    outcomes.push(Err(Error::internal(format!("shard task panicked: {join_err}"))))
                }
            }
        }
        outcomes
    };

    let outcomes = tokio::time::timeout(config.query_timeout(), gather)
        .await
        .map_err(|_| Error::QueryTimeout(config.query_timeout_ms))?;

    let mut results = Vec::with_capacity(outcomes.len());
    for (target, outcome) in plan.targets.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(err) if continue_on_error => {
                warn!(shard = %target.shard_id, error = %err, "shard fetch failed, continuing");
                results.push(ShardFetchResult {
                    shard_id: target.shard_id.clone(),
                    results: Vec::new(),
                    total: 0,
                    error: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err),
        }
    }

    Ok(results)
}

fn backoff_for_attempt(base_ms: u64, attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(20)))
}

async fn fetch_with_retry(
    target: &ShardTarget,
    fetcher: &dyn ShardFetcher,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> Result<ShardFetchResult> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(target).await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < max_retries => {
                debug!(shard = %target.shard_id, attempt, error = %err, "retrying shard fetch");
                tokio::time::sleep(backoff_for_attempt(retry_backoff_ms, attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyFetcher {
        fail_until_attempt: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ShardFetcher for FlakyFetcher {
        async fn fetch(&self, target: &ShardTarget) -> Result<ShardFetchResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until_attempt {
                return Err(Error::Network("transient".to_string()));
            }
            Ok(ShardFetchResult {
                shard_id: target.shard_id.clone(),
                results: Vec::new(),
                total: 1,
                error: None,
            })
        }
    }

    struct AlwaysFailFetcher;

    #[async_trait]
    impl ShardFetcher for AlwaysFailFetcher {
        async fn fetch(&self, _target: &ShardTarget) -> Result<ShardFetchResult> {
            Err(Error::Network("down".to_string()))
        }
    }

    fn plan(shard_ids: &[&str]) -> QueryPlan {
        QueryPlan {
            targets: shard_ids
                .iter()
                .map(|id| ShardTarget {
                    shard_id: ShardId::new(*id),
                    filters: vec![],
                    options: Default::default(),
                })
                .collect(),
            parallel: true,
            requires_merge: shard_ids.len() > 1,
            cost: shard_ids.len() as f64,
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_max_retries() {
        let config = ShardbConfig {
            retry_backoff_ms: 1,
            max_retries: 3,
            ..ShardbConfig::default()
        };
        let fetcher = Arc::new(FlakyFetcher {
            fail_until_attempt: 2,
            calls: AtomicUsize::new(0),
        });
        let plan = plan(&["shard-a"]);
        let results = execute(&plan, fetcher, &config, true).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn continue_on_error_records_failed_shard() {
        let config = ShardbConfig {
            retry_backoff_ms: 1,
            max_retries: 1,
            ..ShardbConfig::default()
        };
        let fetcher = Arc::new(AlwaysFailFetcher);
        let plan = plan(&["shard-a", "shard-b"]);
        let results = execute(&plan, fetcher, &config, true).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.is_some()));
    }

    #[tokio::test]
    async fn continue_on_error_false_surfaces_error() {
        let config = ShardbConfig {
            retry_backoff_ms: 1,
            max_retries: 0,
            ..ShardbConfig::default()
        };
        let fetcher = Arc::new(AlwaysFailFetcher);
        let plan = plan(&["shard-a"]);
        assert!(execute(&plan, fetcher, &config, false).await.is_err());
    }
}
