//! Per-operation time bounds.

use crate::error::{AssignError, AssignResult};
use std::future::Future;
use std::time::Duration;

/// Await `fut` for at most `limit`, returning its raw output.
pub(crate) async fn within<F: Future>(
    limit: Duration,
    what: &'static str,
    fut: F,
) -> AssignResult<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AssignError::Timeout(format!("{what} exceeded {}ms", limit.as_millis())))
}

/// Await a fallible store or filesystem call for at most `limit`.
pub(crate) async fn bounded<T, E, F>(limit: Duration, what: &'static str, fut: F) -> AssignResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AssignError>,
{
    within(limit, what, fut).await?.map_err(Into::into)
}
