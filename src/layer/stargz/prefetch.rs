use crate::{cache::CacheMode, errors::ImageError, layer::stargz::ChunkedLayer};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time::timeout};

/// One-shot completion flag that can be awaited with a deadline
#[derive(Clone)]
pub struct Waiter {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Waiter {
    fn default() -> Self {
        Waiter::new()
    }
}

impl Waiter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Waiter {
            sender: Arc::new(sender),
        }
    }

    pub fn done(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_done(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for [Waiter::done]; a timeout marks the waiter done and fails
    pub async fn wait(&self, limit: Duration) -> Result<(), ImageError> {
        let mut receiver = self.sender.subscribe();
        let result = timeout(limit, receiver.wait_for(|done| *done))
            .await
            .map(|_| ());
        match result {
            Ok(()) => Ok(()),
            Err(_) => {
                self.done();
                Err(ImageError::PrefetchTimeout)
            }
        }
    }
}

/// Prefetch the landmarked region as foreground work, then signal the waiter
pub async fn run_prefetch(layer: Arc<ChunkedLayer>, landmark: u64, waiter: Waiter) {
    {
        let _guard = layer.tasks.prioritized();
        match layer.prefetch(landmark).await {
            Ok(count) => log::info!(
                "layer {} prefetched {} bytes, {} chunks",
                layer.digest(),
                landmark,
                count
            ),
            Err(err) => log::error!("layer {} prefetch failed, {}", layer.digest(), err),
        }
    }
    waiter.done();
}

/// Walk every chunk through the background gate, filling the blob cache
///
/// Stops at the first failure.
pub async fn run_background_fetch(layer: Arc<ChunkedLayer>, limit: Duration) {
    let refs = layer.chunk_refs();
    let total = refs.len();
    for (file, chunk) in refs {
        let result = layer
            .tasks
            .invoke_background(limit, layer.read_chunk(file, chunk, CacheMode::Direct))
            .await;
        if let Err(err) = result {
            log::error!("layer {} background fetch stopped, {}", layer.digest(), err);
            return;
        }
    }
    log::debug!("layer {} background fetch finished {} chunks", layer.digest(), total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn waiter_deadline() {
        Runtime::new().unwrap().block_on(async {
            let waiter = Waiter::new();
            let signal = waiter.clone();
            tokio::spawn(async move { signal.done() });
            assert!(waiter.wait(Duration::from_secs(5)).await.is_ok());

            let stuck = Waiter::new();
            assert!(matches!(
                stuck.wait(Duration::from_millis(10)).await,
                Err(ImageError::PrefetchTimeout)
            ));
            assert!(stuck.is_done());
            assert!(stuck.wait(Duration::from_millis(10)).await.is_ok());
        });
    }
}
