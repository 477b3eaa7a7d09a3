//! `PdmRecorder` — top-level capture lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! PdmRecorder::new(config)
//!     └─► start(source, sink)   → threads spawned, status = Recording
//!         └─► stop()            → running = false, workers wind down
//!             └─► join()        → threads reaped, status = Stopped | Failed
//! ```
//!
//! `start()`/`stop()` return an error in the wrong state rather than
//! panicking. A budgeted source ends the take by itself, so `join()` without
//! `stop()` simply waits for it; an unbudgeted source needs `stop()` first
//! or `join()` will wait forever.
//!
//! ## Threading
//!
//! `start()` spawns two named OS threads:
//!
//! | Thread | Owns | Role |
//! |--------|------|------|
//! | `pdm-producer` | source, writer | clock groups in, decimate, fill buffers |
//! | `pdm-drain` | reader, sink | receive requests, persist PCM |
//!
//! The threads share only atomics, the bounded request queue, and the
//! first-failure slot; neither can block on a lock the other holds. The
//! recorder handle itself is `Send + Sync` — all fields use interior
//! mutability, so it can sit behind an `Arc` in a CLI or service.

pub mod worker;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    buffer::double_buffer,
    decimate::{Decimator, RangePolicy},
    drain::{drain_pair, MIN_QUEUE_DEPTH},
    error::{CaptureError, Result},
    source::{RawSampleSource, WORD_BITS},
    wav::PcmSink,
};

pub use worker::{CaptureDiagnostics, DiagnosticsSnapshot};

use worker::FailureSlot;

/// Highest supported oversampling ratio: 256 PDM bits per PCM sample is the
/// most an 8-bit popcount sample can represent without losing headroom.
pub const MAX_OVERSAMPLE_RATIO: u32 = 256;

/// Configuration for a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Output PCM sample rate (Hz). Default: 12000.
    pub sample_rate: u32,
    /// PDM bits folded into one PCM sample. Must be a non-zero multiple of
    /// 32 and at most [`MAX_OVERSAMPLE_RATIO`]. Default: 256.
    pub oversample_ratio: u32,
    /// PCM samples per double-buffer half; one drain request covers this
    /// many bytes. Default: 1024.
    pub buffer_len: usize,
    /// Drain request queue depth. Must be at least
    /// [`MIN_QUEUE_DEPTH`]. Default: 4.
    pub queue_depth: usize,
    /// How an over-range population count folds into 8 bits. Default: clamp.
    pub range_policy: RangePolicy,
    /// What a missed drain deadline does to the session. Default: degrade.
    pub deadline_policy: DeadlinePolicy,
    /// Whether `stop()` hands the partially filled buffer to the drain
    /// thread instead of discarding it. Default: false, matching the
    /// whole-buffer granularity hardware DMA gives.
    pub flush_partial_on_stop: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 12_000,
            oversample_ratio: 256,
            buffer_len: 1024,
            queue_depth: 4,
            range_policy: RangePolicy::default(),
            deadline_policy: DeadlinePolicy::default(),
            flush_partial_on_stop: false,
        }
    }
}

impl CaptureConfig {
    /// Check the configuration before a session starts.
    ///
    /// # Errors
    /// `CaptureError::Config` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CaptureError::Config("sample_rate must be non-zero".into()));
        }
        if self.oversample_ratio == 0 || self.oversample_ratio % WORD_BITS != 0 {
            return Err(CaptureError::Config(format!(
                "oversample_ratio {} must be a non-zero multiple of {WORD_BITS}",
                self.oversample_ratio
            )));
        }
        if self.oversample_ratio > MAX_OVERSAMPLE_RATIO {
            return Err(CaptureError::Config(format!(
                "oversample_ratio {} exceeds the supported maximum of {MAX_OVERSAMPLE_RATIO}",
                self.oversample_ratio
            )));
        }
        if self.buffer_len == 0 {
            return Err(CaptureError::Config("buffer_len must be non-zero".into()));
        }
        if self.queue_depth < MIN_QUEUE_DEPTH {
            return Err(CaptureError::Config(format!(
                "queue_depth {} is below the minimum of {MIN_QUEUE_DEPTH}",
                self.queue_depth
            )));
        }
        if self.bit_clock_hz().is_none() {
            return Err(CaptureError::Config(format!(
                "sample_rate {} with oversample_ratio {} overflows the 32-bit bit clock",
                self.sample_rate, self.oversample_ratio
            )));
        }
        Ok(())
    }

    /// PDM bit clock this configuration implies:
    /// `sample_rate × oversample_ratio`. `None` if the product overflows.
    pub fn bit_clock_hz(&self) -> Option<u32> {
        self.sample_rate.checked_mul(self.oversample_ratio)
    }

    /// Raw 32-bit words per sample group.
    pub fn group_words(&self) -> usize {
        (self.oversample_ratio / WORD_BITS) as usize
    }
}

/// What a missed drain deadline does to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlinePolicy {
    /// Count the miss, log it, keep the (partially overwritten) audio.
    /// The capture survives at degraded fidelity.
    #[default]
    Degrade,
    /// Fail the session on the first miss or drain-queue overrun.
    Fatal,
}

/// Current state of a [`PdmRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// Recorder created but `start()` not yet called.
    Idle,
    /// Worker threads active, audio flowing to the sink.
    Recording,
    /// Session ended cleanly; recorder may be restarted after `join()`.
    Stopped,
    /// Session ended with a recorded failure; `join()` returned the error.
    Failed,
}

struct WorkerHandles {
    producer: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// The top-level capture handle.
pub struct PdmRecorder {
    config: CaptureConfig,
    /// `true` while the worker threads should keep going.
    running: Arc<AtomicBool>,
    /// Canonical status (written under the Mutex, read from any thread).
    status: Arc<Mutex<CaptureStatus>>,
    /// Shared session counters.
    diagnostics: Arc<CaptureDiagnostics>,
    /// First failure either worker recorded; surfaced by `join()`.
    failure: FailureSlot,
    /// Join handles between `start()` and `join()`.
    workers: Mutex<Option<WorkerHandles>>,
}

impl PdmRecorder {
    /// Create a recorder. Does not start capturing — call `start()`.
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(CaptureStatus::Idle)),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
            failure: FailureSlot::default(),
            workers: Mutex::new(None),
        }
    }

    /// Start a capture session: validate the config, wire the double buffer
    /// to the drain queue, and spawn the `pdm-producer` / `pdm-drain`
    /// threads. Returns as soon as both threads are up.
    ///
    /// # Errors
    /// - `CaptureError::AlreadyRunning` if a session is active or un-joined.
    /// - `CaptureError::Config` if the configuration is invalid.
    /// - `CaptureError::Other` if a worker thread cannot be spawned.
    pub fn start<S, K>(&self, source: S, sink: K) -> Result<()>
    where
        S: RawSampleSource,
        K: PcmSink,
    {
        if self.running.load(Ordering::SeqCst) || self.workers.lock().is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.config.validate()?;

        self.diagnostics.reset();
        let _ = self.failure.take();
        self.running.store(true, Ordering::SeqCst);
        *self.status.lock() = CaptureStatus::Recording;

        let (writer, reader) = double_buffer(self.config.buffer_len);
        let (scheduler, receiver) = drain_pair(self.config.queue_depth);

        let producer_ctx = worker::ProducerContext {
            source,
            decimator: Decimator::new(self.config.range_policy),
            writer,
            scheduler,
            running: Arc::clone(&self.running),
            diagnostics: Arc::clone(&self.diagnostics),
            failure: self.failure.clone(),
            deadline_policy: self.config.deadline_policy,
            flush_partial_on_stop: self.config.flush_partial_on_stop,
            group_words: self.config.group_words(),
        };
        let drain_ctx = worker::DrainContext {
            reader,
            receiver,
            sink,
            running: Arc::clone(&self.running),
            diagnostics: Arc::clone(&self.diagnostics),
            failure: self.failure.clone(),
            deadline_policy: self.config.deadline_policy,
        };

        let drain = match thread::Builder::new()
            .name("pdm-drain".into())
            .spawn(move || worker::run_drain(drain_ctx))
        {
            Ok(handle) => handle,
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                *self.status.lock() = CaptureStatus::Failed;
                return Err(CaptureError::Other(
                    anyhow::Error::new(error).context("failed to spawn pdm-drain thread"),
                ));
            }
        };

        let producer = match thread::Builder::new()
            .name("pdm-producer".into())
            .spawn(move || worker::run_producer(producer_ctx))
        {
            Ok(handle) => handle,
            Err(error) => {
                // The unspawned closure dropped the scheduler, so the drain
                // thread sees a closed queue and exits on its own.
                self.running.store(false, Ordering::SeqCst);
                let _ = drain.join();
                *self.status.lock() = CaptureStatus::Failed;
                return Err(CaptureError::Other(
                    anyhow::Error::new(error).context("failed to spawn pdm-producer thread"),
                ));
            }
        };

        *self.workers.lock() = Some(WorkerHandles { producer, drain });
        info!(
            sample_rate = self.config.sample_rate,
            oversample_ratio = self.config.oversample_ratio,
            buffer_len = self.config.buffer_len,
            "recorder started"
        );
        Ok(())
    }

    /// Request the session to stop. Workers wind down asynchronously;
    /// `join()` waits for them and reports the outcome.
    ///
    /// # Errors
    /// `CaptureError::NotRunning` if no session is active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        *self.status.lock() = CaptureStatus::Stopped;
        info!("capture stop requested");
        Ok(())
    }

    /// Wait for both worker threads to finish and report the session
    /// outcome: the final counter snapshot on success, or the first failure
    /// either worker recorded.
    ///
    /// # Errors
    /// - `CaptureError::NotRunning` if no session was started.
    /// - The recorded worker failure (deadline miss, overrun, storage).
    pub fn join(&self) -> Result<DiagnosticsSnapshot> {
        let handles = self
            .workers
            .lock()
            .take()
            .ok_or(CaptureError::NotRunning)?;

        let producer_panicked = handles.producer.join().is_err();
        let drain_panicked = handles.drain.join().is_err();
        self.running.store(false, Ordering::SeqCst);
        debug!("capture workers joined");

        if producer_panicked || drain_panicked {
            *self.status.lock() = CaptureStatus::Failed;
            return Err(CaptureError::Other(anyhow::anyhow!(
                "capture worker thread panicked"
            )));
        }

        if let Some(error) = self.failure.take() {
            *self.status.lock() = CaptureStatus::Failed;
            return Err(error);
        }

        *self.status.lock() = CaptureStatus::Stopped;
        Ok(self.diagnostics.snapshot())
    }

    /// Current recorder status (snapshot).
    pub fn status(&self) -> CaptureStatus {
        *self.status.lock()
    }

    /// Snapshot of the session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}
