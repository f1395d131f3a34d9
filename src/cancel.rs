//! Cooperative cancellation.
//!
//! Long-running operations take a [`CancellationToken`] and wrap each I/O
//! await in [`cancellable`]. CPU-bound work between awaits runs to
//! completion.

use std::future::Future;

use anyhow::Result;
pub use tokio_util::sync::CancellationToken;

/// Returned (inside `anyhow::Error`) when the token fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Race `fut` against `token`.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(Cancelled.into());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled.into()),
        res = fut => res,
    }
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}
