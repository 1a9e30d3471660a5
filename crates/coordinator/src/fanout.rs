//! Fan-out executor
//!
//! Runs one independent operation per shard concurrently and reports the
//! outcomes in input order. Operations are spawned as their own tasks, so a
//! caller that stops waiting never cancels an RPC that is already in flight.

use crate::error::{CoordinatorError, Result};
use crate::session::ShardSession;
use futures::future::join_all;
use shardgate_common::Target;
use std::future::Future;

/// Run `op` once per item and collect every outcome, in input order
///
/// A single item runs inline on the caller's task.
pub async fn run<I, T, F, Fut>(items: Vec<I>, op: F) -> Vec<Result<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    if items.len() <= 1 {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(op(item).await);
        }
        return results;
    }

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| tokio::spawn(op(item)))
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                Err(CoordinatorError::Internal(format!(
                    "fan-out task failed: {}",
                    e
                )))
            })
        })
        .collect()
}

/// Run `op` against a copy of every shard session
pub async fn run_records<T, F, Fut>(records: &[ShardSession], op: F) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: Fn(ShardSession) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    run(records.to_vec(), op).await
}

/// Run `op` against every target, succeeding only if all calls succeed
pub async fn run_targets<F, Fut>(targets: &[Target], op: F) -> Result<()>
where
    F: Fn(Target) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    into_result(run(targets.to_vec(), op).await).map(|_| ())
}

/// Join outcomes into one result; failures are aggregated in input order
pub fn into_result<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }
    match CoordinatorError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
