//! First-success race over independent lookups.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Poll every future concurrently and return the first `Ok`.
///
/// Futures still pending when a winner arrives are dropped, so their late
/// results are discarded. If every future fails, all errors are returned in
/// completion order.
pub async fn first_ok<I, F, T, E>(futures: I) -> Result<T, Vec<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<F> = futures.into_iter().collect();
    let mut errors = Vec::with_capacity(pending.len());

    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(error) => errors.push(error),
        }
    }

    Err(errors)
}
