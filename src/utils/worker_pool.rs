//! # Worker Pool
//!
//! Bounded pool of OS threads that run packet handlers off the I/O tasks.
//!
//! Each worker owns one bounded queue. Packets are routed to a worker by
//! connection id, so packets of one connection run one at a time and in
//! receipt order while different connections run in parallel. A full queue
//! makes [`WorkerPool::submit`] wait, which in turn stops the connection's
//! reader from pulling more frames off the socket.
//!
//! A handler reply without a target is addressed to the sender and pushed
//! through the outbound pipeline from the worker thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::pipeline::{Dispatch, FrameSink, OutboundPipeline};
use crate::utils::metrics::Metrics;

pub struct WorkerPool {
    queues: RwLock<Vec<mpsc::Sender<Dispatch>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `workers` threads with `queue_bound` pending packets each.
    pub fn new(
        workers: usize,
        queue_bound: usize,
        outbound: Arc<OutboundPipeline>,
        sink: Arc<dyn FrameSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        if workers == 0 || queue_bound == 0 {
            return Err(ProtocolError::ConfigError(
                "Worker pool needs at least one worker and one queue slot".to_string(),
            ));
        }

        let mut queues = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Dispatch>(queue_bound);
            let outbound = outbound.clone();
            let sink = sink.clone();
            let metrics = metrics.clone();

            let handle = std::thread::Builder::new()
                .name(format!("gateway-worker-{index}"))
                .spawn(move || {
                    while let Some(job) = rx.blocking_recv() {
                        execute(job, &outbound, sink.as_ref(), &metrics);
                    }
                    debug!(worker = index, "Worker stopped");
                })?;

            queues.push(tx);
            threads.push(handle);
        }

        debug!(workers, queue_bound, "Worker pool started");
        Ok(Self {
            queues: RwLock::new(queues),
            threads: Mutex::new(threads),
        })
    }

    /// Queue a decoded packet, waiting while its worker's queue is full.
    pub async fn submit(&self, job: Dispatch) -> Result<()> {
        let queue = {
            let queues = self
                .queues
                .read()
                .map_err(|_| ProtocolError::Custom("Worker queue lock poisoned".to_string()))?;
            if queues.is_empty() {
                return Err(ProtocolError::WorkerPoolClosed);
            }
            let index = (job.connection().get() % queues.len() as u64) as usize;
            queues[index].clone()
        };

        queue
            .send(job)
            .await
            .map_err(|_| ProtocolError::WorkerPoolClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.queues.read().map(|q| q.is_empty()).unwrap_or(true)
    }

    /// Stop accepting packets, let workers drain what is queued and join
    /// them. Blocks the calling thread; idempotent.
    pub fn shutdown(&self) {
        if let Ok(mut queues) = self.queues.write() {
            queues.clear();
        }

        let threads = match self.threads.lock() {
            Ok(mut threads) => std::mem::take(&mut *threads),
            Err(_) => return,
        };
        for handle in threads {
            if handle.join().is_err() {
                error!("Worker thread panicked outside a handler");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // dropping the senders ends the worker loops; threads are detached
        if let Ok(mut queues) = self.queues.write() {
            queues.clear();
        }
    }
}

fn execute(job: Dispatch, outbound: &OutboundPipeline, sink: &dyn FrameSink, metrics: &Metrics) {
    let Dispatch {
        context,
        handler,
        mut message,
    } = job;
    let connection = context.connection();
    let opcode = message.opcode();

    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&context, &mut message)));
    match outcome {
        Ok(Ok(Some(reply))) => {
            let reply = match reply.target() {
                Some(_) => reply,
                None => reply.to(connection),
            };
            // a closed target is normal here; the pipeline already logged it
            let _ = outbound.send(reply, sink);
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            metrics.handler_error();
            warn!(%connection, opcode, error = %e, "Handler failed");
        }
        Err(_) => {
            metrics.handler_error();
            error!(%connection, opcode, "Handler panicked");
        }
    }

    message.release();
}
