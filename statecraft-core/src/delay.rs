use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Synthetic event name for a fired `after(ms)` timer targeting `node`,
/// delivered back into the owning machine's own mailbox (§4.4).
pub fn after_event_name(node: &str, ms: u64) -> String {
    format!("after({ms})@{node}")
}

/// Per-machine delay scheduler. Owns a generation counter so that timers
/// armed in a stale configuration (the node was exited before the timer
/// fired) are cancelled rather than silently delivered — `tokio::time`
/// sleeps are spawned as cancellable tasks keyed by the node id plus the
/// configuration generation in which they were armed.
#[derive(Debug, Default)]
pub struct DelayScheduler {
    handles: HashMap<(String, u64), JoinHandle<()>>,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer for `node` that will fire `after_event_name(node, ms)`
    /// on `sink` once `ms` elapses, unless cancelled first via
    /// [`DelayScheduler::cancel`]. `generation` disambiguates re-entries of
    /// the same node within one machine's lifetime.
    pub fn arm(&mut self, node: String, ms: u64, generation: u64, sink: mpsc::Sender<String>) {
        let key = (node.clone(), generation);
        self.cancel(&node, generation);
        let event = after_event_name(&node, ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let _ = sink.send(event).await;
        });
        self.handles.insert(key, handle);
    }

    /// Cancels a previously armed timer, if still pending. A no-op if it
    /// already fired or was never armed — exiting a state always calls this
    /// for every `after` key it declares.
    pub fn cancel(&mut self, node: &str, generation: u64) {
        if let Some(handle) = self.handles.remove(&(node.to_string(), generation)) {
            handle.abort();
        }
    }

    /// Cancels every outstanding timer. Called on machine stop/reset.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_elapsed_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut scheduler = DelayScheduler::new();
        scheduler.arm("m.a".to_string(), 100, 0, tx);

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event, "after(100)@m.a");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut scheduler = DelayScheduler::new();
        scheduler.arm("m.a".to_string(), 100, 0, tx);
        scheduler.cancel("m.a", 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_same_key_cancels_previous() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut scheduler = DelayScheduler::new();
        scheduler.arm("m.a".to_string(), 100, 0, tx.clone());
        scheduler.arm("m.a".to_string(), 100, 0, tx);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap(), "after(100)@m.a");
        assert!(rx.try_recv().is_err());
    }
}
