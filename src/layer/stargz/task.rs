use crate::errors::ImageError;
use std::{
    future::Future,
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    sync::{Notify, Semaphore},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};

/// Admission gate that keeps background reads out of the way of
/// foreground reads
///
/// Background work takes one of a fixed number of permits, then waits until
/// no foreground read is in progress and none has finished within the
/// silence period.
pub struct TaskManager {
    semaphore: Semaphore,
    silence_period: Duration,
    state: Mutex<PriorityState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct PriorityState {
    prioritized: usize,
    last_done: Option<Instant>,
}

/// Marks foreground work in progress for as long as it is held
pub struct PriorityGuard<'a> {
    manager: &'a TaskManager,
}

impl TaskManager {
    pub fn new(max_concurrency: usize, silence_period: Duration) -> Self {
        TaskManager {
            semaphore: Semaphore::new(max_concurrency.max(1)),
            silence_period,
            state: Mutex::new(Default::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PriorityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn prioritized(&self) -> PriorityGuard<'_> {
        self.lock().prioritized += 1;
        PriorityGuard { manager: self }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().prioritized > 0
    }

    async fn wait_for_silence(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            let remaining = {
                let state = self.lock();
                if state.prioritized > 0 {
                    None
                } else {
                    match state.last_done {
                        None => return,
                        Some(last_done) => {
                            let elapsed = last_done.elapsed();
                            if elapsed >= self.silence_period {
                                return;
                            }
                            Some(self.silence_period - elapsed)
                        }
                    }
                }
            };
            match remaining {
                None => notified.await,
                Some(remaining) => {
                    tokio::select! {
                        _ = &mut notified => (),
                        _ = sleep(remaining) => (),
                    }
                }
            }
        }
    }

    /// Run a future as background work, once admitted
    pub async fn invoke_background<T, F>(&self, limit: Duration, fut: F) -> Result<T, ImageError>
    where
        F: Future<Output = Result<T, ImageError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ImageError::TaskManagerClosed)?;
        self.wait_for_silence().await;
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ImageError::BackgroundTimeout),
        }
    }

    /// Refuse any further background work
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl<'a> Drop for PriorityGuard<'a> {
    fn drop(&mut self) {
        {
            let mut state = self.manager.lock();
            state.prioritized = state.prioritized.saturating_sub(1);
            state.last_done = Some(Instant::now());
        }
        self.manager.notify.notify_waiters();
    }
}

/// Tasks that live as long as the tree they serve
///
/// Dropping this aborts every task.
#[derive(Default)]
pub struct BackgroundJobs(Vec<JoinHandle<()>>);

impl BackgroundJobs {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }

    pub fn extend(&mut self, mut other: BackgroundJobs) {
        self.0.append(&mut other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True once every task has completed or been aborted
    pub fn all_finished(&self) -> bool {
        self.0.iter().all(|handle| handle.is_finished())
    }
}

impl Drop for BackgroundJobs {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
