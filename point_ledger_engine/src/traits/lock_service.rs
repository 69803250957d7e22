use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, Error)]
#[error("Could not acquire the ledger lock within {0:?}")]
pub struct LockTimeout(pub Duration);

/// A process-wide mutual-exclusion lock with a bounded wait.
///
/// The engine never holds a raw token for long: it wraps it in a guard that calls [`LockService::release`] on every
/// exit path.
#[allow(async_fn_in_trait)]
pub trait LockService {
    type Token;

    /// Waits at most `timeout` for the lock.
    async fn acquire(&self, timeout: Duration) -> Result<Self::Token, LockTimeout>;

    fn release(&self, token: Self::Token);
}
