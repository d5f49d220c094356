//! Order-preserving bounded executor for independent units of work.
//!
//! Used by the fleet health check so scanning many sites, each issuing
//! several backend requests, cannot stampede a provider quota.

use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run every unit with at most `max_concurrency` executing at once.
///
/// Results come back in input order regardless of completion order. A
/// failing (or panicking) unit records its error in its own slot and never
/// affects its siblings.
pub async fn run_bounded<T, Fut>(units: Vec<Fut>, max_concurrency: usize) -> Vec<Result<T>>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut handles = Vec::with_capacity(units.len());
    for unit in units {
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("scheduler semaphore closed"))?;
            unit.await
        }));
    }

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(anyhow!("unit panicked: {err}")),
        })
        .collect()
}
