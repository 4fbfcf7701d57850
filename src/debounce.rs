//! Send-side coalescing of outbound messages.
//!
//! A [`Debouncer`] turns a burst of [`schedule`](Debouncer::schedule) calls
//! into a single delivery of the most recent payload once the burst has been
//! quiet for `delay`. Intermediate payloads are dropped, so callers must only
//! schedule full-state replacements, never deltas.
//!
//! Each instance owns its own timer. The realtime client keeps one for the
//! card list and one per package entry for version selections, so a burst of
//! card-list edits never delays or cancels a pending version selection, and
//! picking a print for one card never drops the pick for another.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct DebounceState<T> {
    pending: Option<AbortHandle>,
    last_payload: Option<T>,
    /// Serialized form of the last payload actually handed to the sink.
    last_sent: Option<String>,
    generation: u64,
}

/// Delays and coalesces payloads, delivering only the latest of each burst.
///
/// A payload whose JSON serialization is identical to the last one
/// delivered is suppressed. There is no retry and no acknowledgement.
pub struct Debouncer<T> {
    delay: Duration,
    sink: Sink<T>,
    state: Arc<Mutex<DebounceState<T>>>,
}

impl<T> Debouncer<T>
where
    T: Serialize + Send + 'static,
{
    /// Create a debouncer that hands payloads to `sink` after `delay` of quiet.
    pub fn new<F>(delay: Duration, sink: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            sink: Arc::new(sink),
            state: Arc::new(Mutex::new(DebounceState {
                pending: None,
                last_payload: None,
                last_sent: None,
                generation: 0,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending payload with `payload` and restart the timer.
    ///
    /// Outside a Tokio runtime there is no timer to arm, so the payload is
    /// delivered immediately.
    pub fn schedule(&self, payload: T) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime; sending without debounce");
            let mut state = lock(&self.state);
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.last_payload = None;
            state.generation += 1;
            deliver(&self.sink, state, payload);
            return;
        };

        let mut state = lock(&self.state);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;
        state.last_payload = Some(payload);

        let generation = state.generation;
        let delay = self.delay;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = lock(&shared);
            // A newer schedule() or cancel() owns the slot now.
            if state.generation != generation {
                return;
            }
            state.pending = None;
            if let Some(payload) = state.last_payload.take() {
                deliver(&sink, state, payload);
            }
        });
        state.pending = Some(task.abort_handle());
    }

    /// Drop the pending payload, if any, without sending it.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.last_payload = None;
        state.generation += 1;
    }

    /// Deliver the pending payload now instead of waiting for the timer.
    ///
    /// Returns `true` if there was something pending.
    pub fn flush_now(&self) -> bool {
        let mut state = lock(&self.state);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;
        match state.last_payload.take() {
            Some(payload) => {
                deliver(&self.sink, state, payload);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).last_payload.is_some()
    }

    /// Forget the last delivered payload, so the next one is sent even if it
    /// repeats it.
    ///
    /// Call this when someone else has overwritten the remote state: the last
    /// delivery no longer describes what the receiver holds.
    pub fn forget_last_sent(&self) {
        lock(&self.state).last_sent = None;
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
        }
    }
}

fn lock<T>(state: &Mutex<DebounceState<T>>) -> MutexGuard<'_, DebounceState<T>> {
    // The state stays consistent even if a sink panicked mid-delivery.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hand `payload` to the sink unless it repeats the last delivery.
///
/// The guard is released before the sink runs.
fn deliver<T: Serialize>(sink: &Sink<T>, mut state: MutexGuard<'_, DebounceState<T>>, payload: T) {
    match serde_json::to_string(&payload) {
        Ok(serialized) => {
            if state.last_sent.as_deref() == Some(serialized.as_str()) {
                log::debug!("Suppressing duplicate send");
                return;
            }
            state.last_sent = Some(serialized);
        }
        Err(e) => log::warn!("Could not serialize debounced payload: {e}"),
    }
    drop(state);
    sink(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink_sent = Arc::clone(&sent);
        (sent, move |p| sink_sent.lock().unwrap().push(p))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_sends_only_last_payload() {
        let (sent, sink) = recording::<u32>();
        let debouncer = Debouncer::new(Duration::from_millis(500), sink);

        debouncer.schedule(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.schedule(2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.schedule(3);
        assert!(sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*sent.lock().unwrap(), vec![3]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn identical_payload_is_not_resent() {
        let (sent, sink) = recording::<String>();
        let debouncer = Debouncer::new(Duration::from_millis(100), sink);

        debouncer.schedule("a".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.schedule("a".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.schedule("b".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(*sent.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_is_sent_after_forgetting_last_delivery() {
        let (sent, sink) = recording::<String>();
        let debouncer = Debouncer::new(Duration::from_millis(100), sink);

        debouncer.schedule("a".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.forget_last_sent();
        debouncer.schedule("a".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(*sent.lock().unwrap(), vec!["a".to_string(), "a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_payload() {
        let (sent, sink) = recording::<u32>();
        let debouncer = Debouncer::new(Duration::from_millis(100), sink);

        debouncer.schedule(7);
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_sends_immediately() {
        let (sent, sink) = recording::<u32>();
        let debouncer = Debouncer::new(Duration::from_secs(10), sink);

        debouncer.schedule(9);
        assert!(debouncer.flush_now());
        assert_eq!(*sent.lock().unwrap(), vec![9]);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert!(!debouncer.flush_now());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_instances_do_not_interfere() {
        let (slow_sent, slow_sink) = recording::<&'static str>();
        let (fast_sent, fast_sink) = recording::<&'static str>();
        let slow = Debouncer::new(Duration::from_millis(1000), slow_sink);
        let fast = Debouncer::new(Duration::from_millis(500), fast_sink);

        slow.schedule("list");
        fast.schedule("version");
        tokio::time::sleep(Duration::from_millis(400)).await;
        // Another burst on the slow class must not reset the fast timer.
        slow.schedule("list-2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fast_sent.lock().unwrap(), vec!["version"]);
        assert!(slow_sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*slow_sent.lock().unwrap(), vec!["list-2"]);
    }

    #[test]
    fn without_runtime_sends_immediately() {
        let (sent, sink) = recording::<u32>();
        let debouncer = Debouncer::new(Duration::from_secs(1), sink);
        debouncer.schedule(4);
        assert_eq!(*sent.lock().unwrap(), vec![4]);
    }
}
