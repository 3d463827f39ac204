//! Live connection table: connection id to the writer task's queue.
//!
//! The outbound pipeline runs on worker threads and accept tasks alike, so
//! delivery is a non-blocking push onto a bounded queue owned by the
//! connection's writer task. A peer that stops reading fills its queue; the
//! next delivery fails with [`ProtocolError::Backpressure`] and cancels the
//! connection. Unregistering drops the sender; the writer then flushes what
//! is queued and closes the socket's write half.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::DEFAULT_WRITER_QUEUE_BOUND;

use crate::error::{ProtocolError, Result};
use crate::protocol::message::ConnectionId;
use crate::protocol::pipeline::FrameSink;

struct Writer {
    queue: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ConnectionTable {
    writers: Arc<DashMap<ConnectionId, Writer>>,
    next_id: Arc<AtomicU64>,
    queue_bound: usize,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::with_queue_bound(DEFAULT_WRITER_QUEUE_BOUND)
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose writer queues hold at most `queue_bound` frames (min. 1).
    pub fn with_queue_bound(queue_bound: usize) -> Self {
        Self {
            writers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            queue_bound: queue_bound.max(1),
        }
    }

    pub fn queue_bound(&self) -> usize {
        self.queue_bound
    }

    /// Allocate an id for a newly accepted connection. Ids are never reused
    /// within one table.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register the writer queue of `connection` and return its receiving end.
    ///
    /// `cancel` is triggered when the queue overflows.
    pub fn register(
        &self,
        connection: ConnectionId,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Bytes> {
        let (queue, rx) = mpsc::channel(self.queue_bound);
        self.writers.insert(connection, Writer { queue, cancel });
        rx
    }

    /// Forget `connection`. Returns whether it was registered.
    pub fn unregister(&self, connection: ConnectionId) -> bool {
        self.writers.remove(&connection).is_some()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.writers.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl FrameSink for ConnectionTable {
    fn deliver(&self, connection: ConnectionId, frame: Bytes) -> Result<()> {
        let writer = self
            .writers
            .get(&connection)
            .ok_or(ProtocolError::ConnectionClosed)?;
        match writer.queue.try_send(frame) {
            Ok(()) => {
                trace!(%connection, "Frame queued for writer");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(%connection, bound = self.queue_bound, "Writer queue full, closing connection");
                writer.cancel.cancel();
                Err(ProtocolError::Backpressure(connection))
            }
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }
}
