//! Background task pool.
//!
//! Every long-running task (provider watchers, throttle lanes, the reload
//! loop) is spawned here with its own shutdown receiver, so that shutdown
//! can signal all of them and wait for them to finish.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

#[derive(Clone)]
pub struct TaskPool {
    shutdown: Shutdown,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskPool {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Spawn `task` with a fresh shutdown receiver. Ignored once shutdown began.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown.subscribe();
        if self.shutdown.is_triggered() {
            tracing::debug!("Shutdown in progress, task not started");
            return;
        }
        let handle = tokio::spawn(task(rx));
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// Number of tasks still running.
    pub fn running(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for every task, aborting those still running after `timeout`.
    /// Returns true when all tasks finished on their own.
    pub async fn join(&self, timeout: Duration) -> bool {
        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(tasks = aborts.len(), "Background tasks did not stop in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_stop_on_shutdown() {
        let pool = TaskPool::new(Shutdown::new());
        for _ in 0..3 {
            pool.spawn(|mut rx| async move {
                let _ = rx.recv().await;
            });
        }
        assert_eq!(pool.running(), 3);

        pool.shutdown().trigger();
        assert!(pool.join(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tasks_are_aborted() {
        let pool = TaskPool::new(Shutdown::new());
        pool.spawn(|_rx| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        pool.shutdown().trigger();
        assert!(!pool.join(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn no_spawn_after_shutdown() {
        let pool = TaskPool::new(Shutdown::new());
        pool.shutdown().trigger();
        pool.spawn(|_rx| async {});
        assert_eq!(pool.running(), 0);
    }
}
