//! Serialized synthesis runtime.
//!
//! A [`SynthesisQueue`] moves a [`Pipeline`] onto a dedicated worker thread
//! and feeds it requests strictly one at a time, in submission order.

use crate::error::{Result, TtsError};
use crate::pipeline::{CancelToken, Pipeline, SynthesisRequest, SynthesisResult};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

enum RuntimeCommand {
    Synthesize {
        id: u64,
        request: SynthesisRequest,
        cancel: CancelToken,
        reply: oneshot::Sender<Result<SynthesisResult>>,
    },
    Warmup {
        reply: oneshot::Sender<Result<()>>,
    },
    ClearCache {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Requests accepted but not yet started, by submission id.
type PendingMap = Arc<Mutex<HashMap<u64, CancelToken>>>;

/// Completion handle for a submitted request.
///
/// Await it, or call [`SynthesisTicket::wait`] from synchronous code.
pub struct SynthesisTicket {
    rx: oneshot::Receiver<Result<SynthesisResult>>,
    cancel: CancelToken,
}

impl SynthesisTicket {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn wait(self) -> Result<SynthesisResult> {
        futures::executor::block_on(self)
    }
}

impl Future for SynthesisTicket {
    type Output = Result<SynthesisResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Worker went away without answering.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(TtsError::Disposed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct SynthesisQueue {
    tx: Option<mpsc::Sender<RuntimeCommand>>,
    worker: Option<JoinHandle<()>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl SynthesisQueue {
    /// Start the worker thread; it owns `pipeline` from now on.
    pub fn new(pipeline: Pipeline) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<RuntimeCommand>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let worker_pending = pending.clone();
        let worker = thread::Builder::new()
            .name("sbv2-synthesis".to_string())
            .spawn(move || run_worker(pipeline, rx, worker_pending))?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            pending,
            next_id: AtomicU64::new(0),
        })
    }

    /// Enqueue a request. The ticket resolves once the worker reaches it.
    pub fn submit(&self, request: SynthesisRequest, cancel: CancelToken) -> SynthesisTicket {
        let (reply, rx) = oneshot::channel();
        let ticket = SynthesisTicket {
            rx,
            cancel: cancel.clone(),
        };

        let Some(tx) = self.tx.as_ref() else {
            let _ = reply.send(Err(TtsError::Disposed));
            return ticket;
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock_pending().insert(id, cancel.clone());
        let command = RuntimeCommand::Synthesize {
            id,
            request,
            cancel,
            reply,
        };
        if let Err(mpsc::SendError(command)) = tx.send(command) {
            self.lock_pending().remove(&id);
            if let RuntimeCommand::Synthesize { reply, .. } = command {
                let _ = reply.send(Err(TtsError::Disposed));
            }
        }
        ticket
    }

    /// Blocking form of [`SynthesisQueue::submit`].
    pub fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResult> {
        self.submit(request, CancelToken::new()).wait()
    }

    pub fn warmup(&self) -> Result<()> {
        self.round_trip(|reply| RuntimeCommand::Warmup { reply })
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.round_trip(|reply| RuntimeCommand::ClearCache { reply })
    }

    /// Cancel every request that has been queued but not started.
    ///
    /// Returns how many were cancelled; the request currently running is
    /// left alone.
    pub fn clear(&self) -> usize {
        let pending = self.lock_pending();
        for token in pending.values() {
            token.cancel();
        }
        pending.len()
    }

    /// Number of accepted requests the worker has not started yet.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// Stop the worker and dispose the pipeline. Idempotent.
    pub fn shutdown(&mut self) {
        self.clear();
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(RuntimeCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Synthesis worker panicked");
            }
        }
    }

    fn round_trip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> RuntimeCommand,
    ) -> Result<T> {
        let tx = self.tx.as_ref().ok_or(TtsError::Disposed)?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply)).map_err(|_| TtsError::Disposed)?;
        futures::executor::block_on(rx).map_err(|_| TtsError::Disposed)?
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CancelToken>> {
        // A poisoned map is still structurally valid.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SynthesisQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut pipeline: Pipeline, rx: mpsc::Receiver<RuntimeCommand>, pending: PendingMap) {
    tracing::debug!("Synthesis worker started");
    for command in rx {
        match command {
            RuntimeCommand::Synthesize {
                id,
                request,
                cancel,
                reply,
            } => {
                pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&id);
                let result = if cancel.is_cancelled() {
                    Err(TtsError::Cancelled)
                } else {
                    pipeline.synthesize_with_cancel(&request, &cancel)
                };
                let _ = reply.send(result);
            }
            RuntimeCommand::Warmup { reply } => {
                let _ = reply.send(pipeline.warmup());
            }
            RuntimeCommand::ClearCache { reply } => {
                pipeline.clear_cache();
                let _ = reply.send(Ok(()));
            }
            RuntimeCommand::Shutdown => break,
        }
    }
    pipeline.dispose();
    tracing::debug!("Synthesis worker stopped");
}
