use crate::limit::TokenBucket;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-component burst allowance before rate limiting kicks in.
const BURST: f64 = 10.0;
/// Sustained rate after the burst: one reported event per 30 seconds.
const EVENTS_PER_SEC: f64 = 1.0 / 30.0;
/// Bounded mailbox; reporting is lossy.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
struct DiagEvent {
    component: &'static str,
    message: String,
}

/// Best-effort, non-blocking error reporting handle.
///
/// Components hand failures here instead of logging directly so that a
/// component failing in a tight loop cannot flood the log: events are
/// rate-limited per component key, and the send itself never blocks.
#[derive(Clone)]
pub struct DiagHandle {
    tx: mpsc::Sender<DiagEvent>,
}

impl DiagHandle {
    pub fn report(&self, component: &'static str, err: &dyn fmt::Display) {
        let event = DiagEvent {
            component,
            message: err.to_string(),
        };
        // Full or closed mailbox: the event is lost, which is acceptable.
        let _ = self.tx.try_send(event);
    }
}

struct KeyState {
    bucket: TokenBucket,
    suppressed: u64,
}

/// Spawn the reporter loop. The task ends when every handle is dropped.
pub fn spawn() -> (DiagHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DiagEvent>(QUEUE_DEPTH);
    let task = tokio::spawn(async move {
        let mut keys: HashMap<&'static str, KeyState> = HashMap::new();
        while let Some(event) = rx.recv().await {
            let state = keys.entry(event.component).or_insert_with(|| KeyState {
                bucket: TokenBucket::new(BURST, EVENTS_PER_SEC),
                suppressed: 0,
            });
            if state.bucket.try_take() {
                if state.suppressed > 0 {
                    tracing::warn!(
                        component = event.component,
                        suppressed = state.suppressed,
                        "{}",
                        event.message
                    );
                    state.suppressed = 0;
                } else {
                    tracing::warn!(component = event.component, "{}", event.message);
                }
            } else {
                state.suppressed += 1;
            }
        }
    });
    (DiagHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_suppression_per_key() {
        let mut state = KeyState {
            bucket: TokenBucket::new(BURST, EVENTS_PER_SEC),
            suppressed: 0,
        };
        let mut reported = 0;
        for _ in 0..25 {
            if state.bucket.try_take() {
                reported += 1;
            } else {
                state.suppressed += 1;
            }
        }
        assert_eq!(reported, 10);
        assert_eq!(state.suppressed, 15);
    }

    #[tokio::test]
    async fn report_never_blocks_even_when_the_loop_is_gone() {
        let (handle, task) = spawn();
        task.abort();
        let _ = task.await;
        // Mailbox fills (or is closed); every send must still return immediately.
        for _ in 0..200 {
            handle.report("test", &"boom");
        }
    }
}
