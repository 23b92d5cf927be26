use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Batch-wide ceiling on simultaneous external calls.
///
/// Every fetch and every model call runs inside [`CallGate::run`], so the
/// number of outstanding calls never exceeds the permit count regardless of
/// how many year tasks are alive.
#[derive(Debug, Clone)]
pub struct CallGate {
    permits: Arc<Semaphore>,
}

impl CallGate {
    pub fn new(ceiling: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `call` while holding one permit.
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.permits.acquire().await.ok();
        call.await
    }
}
