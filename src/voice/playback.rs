//! Queued audio playback
//!
//! Producers enqueue whole buffers; a single worker thread drains them to an
//! [`OutputSink`] in fixed-size chunks, strictly in enqueue order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::sink::OutputSink;
use crate::config::PlaybackConfig;
use crate::{Error, Result};

/// Opens the output sink each time the worker starts
pub type SinkOpener = Box<dyn FnMut() -> Result<Box<dyn OutputSink>> + Send>;

/// Liveness of the playback worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// No worker running
    Stopped,
    /// Worker is draining the queue
    Running,
    /// Worker aborted on a sink error and closed its sink; call `start()`
    Failed,
}

/// Buffer the worker is part way through
struct Current {
    buffer: Vec<u8>,
    /// Start of the first chunk not yet handed to the sink
    offset: usize,
}

struct QueueState {
    buffers: VecDeque<Vec<u8>>,
    current: Option<Current>,
    stop: bool,
    status: WorkerStatus,
    /// Bumped on every start so a detached worker can tell it is stale
    generation: u64,
}

impl QueueState {
    const fn should_exit(&self, generation: u64) -> bool {
        self.stop || self.generation != generation
    }

    /// Put the unwritten tail of the current buffer back at the head
    fn requeue_current(&mut self) {
        if let Some(Current { mut buffer, offset }) = self.current.take()
            && offset < buffer.len()
        {
            let remaining = buffer.len() - offset;
            buffer.drain(..offset);
            self.buffers.push_front(buffer);
            tracing::debug!(remaining, "requeued partial buffer");
        }
    }

    fn is_idle(&self) -> bool {
        self.buffers.is_empty() && self.current.is_none()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable producer side of a [`PlaybackQueue`]
#[derive(Clone)]
pub struct PlaybackHandle {
    shared: Arc<Shared>,
}

impl PlaybackHandle {
    /// Append a buffer to the tail of the queue without blocking
    pub fn enqueue(&self, buffer: Vec<u8>) {
        if buffer.is_empty() {
            return;
        }

        let queued = {
            let mut state = self.shared.lock();
            state.buffers.push_back(buffer);
            state.buffers.len()
        };
        self.shared.available.notify_one();
        tracing::trace!(queued, "buffer enqueued");
    }

    /// Decode a base64 audio chunk and enqueue it
    ///
    /// # Errors
    ///
    /// Returns error if `encoded` is not valid base64; nothing is enqueued
    pub fn enqueue_base64(&self, encoded: &str) -> Result<()> {
        let bytes = STANDARD.decode(encoded.trim())?;
        self.enqueue(bytes);
        Ok(())
    }

    /// Number of buffers waiting to be played
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().buffers.len()
    }

    /// Whether no buffers are waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current worker status
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.shared.lock().status
    }
}

/// Ordered playback queue drained by one background worker
pub struct PlaybackQueue {
    handle: PlaybackHandle,
    opener: SinkOpener,
    chunk_size: usize,
    stop_timeout: Duration,
    /// Yields the sink back unless the worker already closed it
    worker: Option<JoinHandle<Option<Box<dyn OutputSink>>>>,
}

impl PlaybackQueue {
    /// Create a stopped queue; `opener` is called on every `start()`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the chunk size is zero
    pub fn new<F>(config: &PlaybackConfig, opener: F) -> Result<Self>
    where
        F: FnMut() -> Result<Box<dyn OutputSink>> + Send + 'static,
    {
        if config.chunk_size == 0 {
            return Err(Error::Config("playback chunk size must be non-zero".to_string()));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                buffers: VecDeque::new(),
                current: None,
                stop: false,
                status: WorkerStatus::Stopped,
                generation: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        });

        Ok(Self {
            handle: PlaybackHandle { shared },
            opener: Box::new(opener),
            chunk_size: config.chunk_size,
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            worker: None,
        })
    }

    /// Producer handle that can be shared across threads
    #[must_use]
    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    /// Append a buffer to the tail of the queue without blocking
    pub fn enqueue(&self, buffer: Vec<u8>) {
        self.handle.enqueue(buffer);
    }

    /// Open the sink and launch the worker
    ///
    /// Does nothing if a worker is already running. A failed worker is reaped
    /// first.
    ///
    /// # Errors
    ///
    /// Returns error if the sink cannot be opened or the thread cannot spawn
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            if self.status() == WorkerStatus::Running {
                return Ok(());
            }
            self.stop()?;
        }

        let mut sink = (self.opener)()?;
        let shared = Arc::clone(&self.handle.shared);
        let generation = {
            let mut state = shared.lock();
            state.stop = false;
            state.generation += 1;
            state.status = WorkerStatus::Running;
            state.generation
        };

        let chunk_size = self.chunk_size;
        let spawned = std::thread::Builder::new()
            .name("parley-playback".to_string())
            .spawn(move || {
                if run_worker(&shared, sink.as_mut(), chunk_size, generation) {
                    Some(sink)
                } else {
                    if let Err(e) = sink.close() {
                        tracing::warn!(error = %e, "failed to close sink after playback error");
                    }
                    mark_failed(&shared, generation);
                    None
                }
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                tracing::debug!(chunk_size, "playback worker started");
                Ok(())
            }
            Err(e) => {
                self.handle.shared.lock().status = WorkerStatus::Stopped;
                Err(Error::Playback(format!("failed to spawn playback worker: {e}")))
            }
        }
    }

    /// Signal the worker, wait for it, and release the sink
    ///
    /// The chunk being written when the signal arrives completes first; the
    /// rest of that buffer goes back to the head of the queue. A worker still
    /// blocked in the sink after the stop timeout is detached and writes
    /// nothing further.
    ///
    /// # Errors
    ///
    /// Returns error if the sink fails to close or the worker panicked
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.handle.shared.lock().stop = true;
        self.handle.shared.available.notify_all();

        let deadline = Instant::now() + self.stop_timeout;
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let result = if worker.is_finished() {
            match worker.join() {
                Ok(Some(mut sink)) => sink.close(),
                Ok(None) => Ok(()),
                Err(_) => Err(Error::Playback("playback worker panicked".to_string())),
            }
        } else {
            tracing::warn!(
                timeout_ms = self.stop_timeout.as_millis(),
                "playback worker did not exit in time, detaching"
            );
            Ok(())
        };

        {
            let mut state = self.handle.shared.lock();
            state.status = WorkerStatus::Stopped;
            state.requeue_current();
        }
        self.handle.shared.idle.notify_all();

        tracing::info!(pending = self.len(), "audio player closed");
        result
    }

    /// Block until every queued buffer has been written
    ///
    /// Returns `false` if the timeout elapses or the worker is not running.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.handle.shared;
        let deadline = Instant::now() + timeout;
        let mut state = shared.lock();

        loop {
            if state.is_idle() {
                return true;
            }
            if state.status != WorkerStatus::Running {
                return false;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = shared
                .idle
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Current worker status
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.handle.status()
    }

    /// Number of buffers waiting to be played
    #[must_use]
    pub fn len(&self) -> usize {
        self.handle.len()
    }

    /// Whether no buffers are waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop playback worker");
        }
    }
}

/// Record a sink failure unless the worker was already superseded
fn mark_failed(shared: &Shared, generation: u64) {
    {
        let mut state = shared.lock();
        if state.should_exit(generation) {
            return;
        }
        state.status = WorkerStatus::Failed;
        // The failed buffer is dropped; later buffers stay queued
        state.current = None;
    }
    shared.idle.notify_all();
}

/// Drain the queue into `sink` until stopped or a write fails
///
/// Returns `false` on a write error. The unwritten tail of the buffer being
/// played lives in the shared state, so only the owner of the current
/// generation can ever see it again.
fn run_worker(
    shared: &Shared,
    sink: &mut dyn OutputSink,
    chunk_size: usize,
    generation: u64,
) -> bool {
    loop {
        let chunk = {
            let mut state = shared.lock();
            loop {
                if state.should_exit(generation) {
                    return true;
                }

                match state.current.as_mut() {
                    Some(current) if current.offset < current.buffer.len() => {
                        let end = (current.offset + chunk_size).min(current.buffer.len());
                        let chunk = current.buffer[current.offset..end].to_vec();
                        current.offset = end;
                        break chunk;
                    }
                    Some(_) => {
                        state.current = None;
                        shared.idle.notify_all();
                    }
                    None => {
                        if let Some(buffer) = state.buffers.pop_front() {
                            state.current = Some(Current { buffer, offset: 0 });
                        } else {
                            state = shared
                                .available
                                .wait(state)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                    }
                }
            }
        };

        if let Err(e) = sink.write(&chunk) {
            tracing::error!(error = %e, len = chunk.len(), "playback error");
            return false;
        }
    }
}
