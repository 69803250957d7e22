use std::{sync::Arc, time::Duration};

use log::*;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::traits::{LockService, LockTimeout};

/// A process-wide lock backed by a tokio mutex. Cloning gives another handle onto the same lock.
#[derive(Debug, Clone, Default)]
pub struct ProcessLock {
    inner: Arc<Mutex<()>>,
}

/// Proof of lock ownership. Dropping the token releases the lock.
#[derive(Debug)]
pub struct ProcessLockToken {
    _guard: OwnedMutexGuard<()>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl LockService for ProcessLock {
    type Token = ProcessLockToken;

    async fn acquire(&self, timeout: Duration) -> Result<Self::Token, LockTimeout> {
        match tokio::time::timeout(timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => {
                trace!("🚦 Lock acquired");
                Ok(ProcessLockToken { _guard: guard })
            },
            Err(_) => {
                warn!("🚦 Timed out after {timeout:?} waiting for the lock");
                Err(LockTimeout(timeout))
            },
        }
    }

    fn release(&self, token: Self::Token) {
        drop(token);
        trace!("🚦 Lock released");
    }
}
