//! Deferred initializers: work queued during activation, run once all extensions are up.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::error::{Error, Result};

type DeferredTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Ordered queue of deferred initializers.
#[derive(Clone, Default)]
pub struct DeferredQueue {
    tasks: Arc<Mutex<Vec<DeferredTask>>>,
}

impl DeferredQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an initializer.
    pub fn push<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.lock().push(Box::new(move || task().boxed()));
    }

    /// Number of pending initializers.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Run every pending initializer in registration order, awaiting each.
    ///
    /// Initializers queued while draining run after the ones already queued.
    /// Stops at the first failure. Returns the number of initializers run.
    pub async fn drain(&self) -> Result<usize> {
        let mut index = 0;
        loop {
            let next = {
                let mut tasks = self.tasks.lock();
                if tasks.is_empty() {
                    break;
                }
                tasks.remove(0)
            };

            next().await.map_err(|e| Error::DeferredFailed {
                index,
                source: Box::new(e),
            })?;
            index += 1;
        }
        Ok(index)
    }
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_in_order() {
        let queue = DeferredQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue.push(move || async move {
                tokio::task::yield_now().await;
                order.lock().push(i);
                Ok(())
            });
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain().await.unwrap(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_runs_tasks_queued_while_draining() {
        let queue = DeferredQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = queue.clone();
        let inner_order = order.clone();
        queue.push(move || async move {
            inner_order.lock().push("first");
            let order = inner_order.clone();
            inner_queue.push(move || async move {
                order.lock().push("nested");
                Ok(())
            });
            Ok(())
        });

        assert_eq!(queue.drain().await.unwrap(), 2);
        assert_eq!(*order.lock(), vec!["first", "nested"]);
    }

    #[tokio::test]
    async fn test_drain_stops_on_failure() {
        let queue = DeferredQueue::new();
        let ran = Arc::new(Mutex::new(false));

        queue.push(|| async { Err(Error::extension("route table conflict")) });
        let ran_clone = ran.clone();
        queue.push(move || async move {
            *ran_clone.lock() = true;
            Ok(())
        });

        let err = queue.drain().await.unwrap_err();
        assert!(matches!(err, Error::DeferredFailed { index: 0, .. }));
        assert!(!*ran.lock());
        assert_eq!(queue.len(), 1);
    }
}
