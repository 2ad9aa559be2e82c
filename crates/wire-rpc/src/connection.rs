//! Connection adapters (C8): the glue between a raw `TcpStream` and the
//! framing codec, including the high-watermark read-pause backpressure
//! protocol described in spec.md §4.7/§5.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Notify};

use crate::framing::{Decoded, FrameDecoder, FramingError};

/// Tracks pending (unwritten) output bytes for one connection and gates the
/// reader on whether that count has crossed the high-water mark. Stands in
/// for `TcpConnection::{stopRead, startRead, setHighWaterMarkCallback}`.
pub struct HighWaterGate {
    pending: Arc<AtomicUsize>,
    threshold: usize,
    drained: Arc<Notify>,
}

impl HighWaterGate {
    fn new(threshold: usize) -> (Self, Arc<AtomicUsize>, Arc<Notify>) {
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());
        (
            Self {
                pending: pending.clone(),
                threshold,
                drained: drained.clone(),
            },
            pending,
            drained,
        )
    }

    /// Blocks the reader until pending write bytes fall back under the
    /// high-water mark. A no-op if already under it — this is the
    /// `onHighWaterMark`/`onWriteComplete` pair collapsed into one gate the
    /// read loop consults before every socket read.
    ///
    /// The `notified()` future is registered and `enable()`d *before* the
    /// pending-bytes load, not after, so a `notify_waiters()` landing in the
    /// gap between the load and the await is still observed instead of
    /// being lost — `notify_waiters()` only wakes futures that were already
    /// registered at the time it fires.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.load(Ordering::Acquire) <= self.threshold {
                return;
            }

            notified.await;
        }
    }

    pub fn is_over_watermark(&self) -> bool {
        self.pending.load(Ordering::Acquire) > self.threshold
    }
}

/// A cheaply cloneable handle for enqueueing framed writes to a connection's
/// dedicated writer task.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutboundHandle {
    /// Enqueues a pre-framed message for writing. Never blocks — the
    /// message is handed to the writer task's queue.
    pub fn send(&self, framed: Vec<u8>) -> bool {
        self.tx.send(framed).is_ok()
    }
}

/// Spawns the dedicated writer task for one connection's `TcpStream` half.
/// Returns a handle callers use to enqueue writes, plus the gate the reader
/// loop should consult before pulling more bytes off the socket.
pub fn spawn_writer(mut write_half: OwnedWriteHalf, high_water_mark: usize) -> (OutboundHandle, HighWaterGate) {
    let (gate, pending, drained) = HighWaterGate::new(high_water_mark);
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            pending.fetch_add(bytes.len(), Ordering::AcqRel);
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
            pending.fetch_sub(bytes.len(), Ordering::AcqRel);
            drained.notify_waiters();
        }
        let _ = write_half.shutdown().await;
    });

    (OutboundHandle { tx }, gate)
}

/// Reads raw bytes off `read_half` into `decoder`, honoring the
/// high-water-mark gate between reads, and returns the next decoded frame
/// (or `Ok(None)` on clean EOF).
pub async fn read_frame(
    read_half: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    gate: &HighWaterGate,
) -> Result<Option<String>, FramingError> {
    loop {
        match decoder.decode_next()? {
            Some(Decoded::Frame(body)) => return Ok(Some(body)),
            Some(Decoded::EmptyLine) => continue,
            None => {}
        }

        gate.wait_until_drained().await;

        let mut buf = [0u8; 8192];
        let n = match read_half.read(&mut buf).await {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        decoder.push_bytes(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_until_drained_is_a_no_op_under_the_watermark() {
        let (gate, _pending, _drained) = HighWaterGate::new(1024);
        tokio::time::timeout(Duration::from_millis(50), gate.wait_until_drained())
            .await
            .expect("must not block when already under the watermark");
    }

    #[tokio::test]
    async fn a_drain_landing_between_the_load_and_the_await_still_wakes_the_reader() {
        let (gate, pending, drained) = HighWaterGate::new(0);
        pending.store(10, Ordering::Release);

        let gate = Arc::new(gate);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_drained().await })
        };

        // Give the waiter time to register its `notified()` future, then
        // drain and notify — simulating the writer task's drain landing in
        // the narrow window between the reader's load and its await.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pending.store(0, Ordering::Release);
        drained.notify_waiters();

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("the wakeup must not be lost")
            .unwrap();
    }
}
