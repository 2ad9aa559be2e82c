//! Batch response aggregator (C7): a thread-safe accumulator for batch
//! replies, shared between however many requests in a batch are dispatched
//! concurrently.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

struct Inner {
    responses: Mutex<Vec<Value>>,
    done: Mutex<Option<oneshot::Sender<Vec<Value>>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(tx) = self.done.lock().unwrap().take() {
            let responses = std::mem::take(&mut *self.responses.lock().unwrap());
            let _ = tx.send(responses);
        }
    }
}

/// A cloneable handle to a batch's shared response array. Each dispatched
/// request holds one clone for the duration of its handler; when the last
/// clone is dropped, the accumulated array is sent on the completion
/// channel exactly once — mirroring the "destroy triggers completion"
/// pattern of the original `ThreadSafeBatchResponse`.
#[derive(Clone)]
pub struct BatchAggregator(Arc<Inner>);

impl BatchAggregator {
    /// Creates a fresh aggregator and the receiver that resolves once every
    /// clone of the returned handle has been dropped.
    pub fn new() -> (Self, oneshot::Receiver<Vec<Value>>) {
        let (tx, rx) = oneshot::channel();
        let inner = Inner {
            responses: Mutex::new(Vec::new()),
            done: Mutex::new(Some(tx)),
        };
        (Self(Arc::new(inner)), rx)
    }

    /// Appends one response to the batch's array. Safe to call from any
    /// task holding a clone of this handle.
    pub fn add_response(&self, response: Value) {
        self.0.responses.lock().unwrap().push(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fires_once_after_the_last_clone_drops() {
        let (agg, rx) = BatchAggregator::new();
        let a = agg.clone();
        let b = agg.clone();
        drop(agg);

        a.add_response(json!({"id": 1}));
        b.add_response(json!({"id": 2}));
        drop(a);
        drop(b);

        let responses = rx.await.unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_of_notifications_yields_empty_array() {
        let (agg, rx) = BatchAggregator::new();
        drop(agg);
        let responses = rx.await.unwrap();
        assert!(responses.is_empty());
    }
}
