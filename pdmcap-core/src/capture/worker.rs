//! Producer and drain loops.
//!
//! ## Producer stages (thread `pdm-producer`, per iteration)
//!
//! ```text
//! 1. Check running flag
//! 2. next_group  → one group of raw PDM words (source cadence = clock)
//! 3. decimate    → one 8-bit PCM sample
//! 4. write       → Some(DrainRequest) each time a buffer fills
//! 5. notify      → Queued | Overflowed | Suppressed
//! ```
//!
//! ## Drain stages (thread `pdm-drain`, per request)
//!
//! ```text
//! 1. recv DrainRequest   (blocks; None once stopped and queue empty)
//! 2. read filled buffer  (generation check → DeadlineMiss)
//! 3. sink.write(bytes)
//! 4. finished()          → scheduler back to Idle / Pending
//! ```
//!
//! The producer path between `next_group` calls is the time-critical one:
//! it must finish before the source clocks in the next group. Neither loop
//! allocates after start-up — the group slice and the drain scratch buffer
//! are reused every iteration — and the producer only logs on rare events
//! (overflow, shutdown), never per sample.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    buffer::{BufferReader, BufferWriter},
    capture::DeadlinePolicy,
    decimate::Decimator,
    drain::{DrainReceiver, DrainScheduler, NotifyOutcome},
    error::CaptureError,
    source::{RawSampleSource, RawSampleWord, SourceRead},
    wav::PcmSink,
};

pub struct CaptureDiagnostics {
    pub groups_in: AtomicU64,
    pub pcm_samples: AtomicU64,
    pub swaps: AtomicU64,
    pub drains: AtomicU64,
    pub bytes_drained: AtomicU64,
    pub hardware_overflows: AtomicU64,
    pub deadline_misses: AtomicU64,
    pub drain_overruns: AtomicU64,
}

impl Default for CaptureDiagnostics {
    fn default() -> Self {
        Self {
            groups_in: AtomicU64::new(0),
            pcm_samples: AtomicU64::new(0),
            swaps: AtomicU64::new(0),
            drains: AtomicU64::new(0),
            bytes_drained: AtomicU64::new(0),
            hardware_overflows: AtomicU64::new(0),
            deadline_misses: AtomicU64::new(0),
            drain_overruns: AtomicU64::new(0),
        }
    }
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.groups_in.store(0, Ordering::Relaxed);
        self.pcm_samples.store(0, Ordering::Relaxed);
        self.swaps.store(0, Ordering::Relaxed);
        self.drains.store(0, Ordering::Relaxed);
        self.bytes_drained.store(0, Ordering::Relaxed);
        self.hardware_overflows.store(0, Ordering::Relaxed);
        self.deadline_misses.store(0, Ordering::Relaxed);
        self.drain_overruns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            groups_in: self.groups_in.load(Ordering::Relaxed),
            pcm_samples: self.pcm_samples.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            bytes_drained: self.bytes_drained.load(Ordering::Relaxed),
            hardware_overflows: self.hardware_overflows.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            drain_overruns: self.drain_overruns.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot for observability; serialized by the CLI's JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    /// Raw sample groups acquired from the source.
    pub groups_in: u64,
    /// PCM samples produced by decimation.
    pub pcm_samples: u64,
    /// Completed buffer fills (active/inactive role swaps).
    pub swaps: u64,
    /// Drain requests fully written to the sink.
    pub drains: u64,
    /// PCM bytes handed to the sink.
    pub bytes_drained: u64,
    /// Raw groups the source reported lost to its own FIFO overflow.
    pub hardware_overflows: u64,
    /// Buffers overwritten mid-drain (stale generation observed).
    pub deadline_misses: u64,
    /// Swap notifications rejected because the drain queue was full.
    pub drain_overruns: u64,
}

/// First-failure slot shared by both worker threads.
///
/// Whichever thread fails first wins; later failures are downstream noise
/// of the first and are logged but not stored.
#[derive(Clone, Default)]
pub struct FailureSlot(Arc<Mutex<Option<CaptureError>>>);

impl FailureSlot {
    pub fn record(&self, error: CaptureError) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(error);
        } else {
            debug!(error = %error, "suppressing secondary failure");
        }
    }

    pub fn take(&self) -> Option<CaptureError> {
        self.0.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

/// All context the producer loop needs, passed as one struct so the thread
/// closure stays tidy.
pub struct ProducerContext<S: RawSampleSource> {
    pub source: S,
    pub decimator: Decimator,
    pub writer: BufferWriter,
    pub scheduler: DrainScheduler,
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<CaptureDiagnostics>,
    pub failure: FailureSlot,
    pub deadline_policy: DeadlinePolicy,
    pub flush_partial_on_stop: bool,
    /// Raw words per sample group (`oversample_ratio / 32`).
    pub group_words: usize,
}

/// Run the producer loop until the source exhausts or `ctx.running` clears.
pub fn run_producer<S: RawSampleSource>(mut ctx: ProducerContext<S>) {
    info!(group_words = ctx.group_words, "producer started");

    let mut group: Vec<RawSampleWord> = vec![0; ctx.group_words];

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Acquire the next raw group ─────────────────────────────────
        match ctx.source.next_group(&mut group) {
            SourceRead::Group => {}
            SourceRead::GroupAfterOverflow { dropped } => {
                ctx.diagnostics
                    .hardware_overflows
                    .fetch_add(u64::from(dropped), Ordering::Relaxed);
                warn!(dropped, "source FIFO overflowed; capture continues with a gap");
            }
            SourceRead::Exhausted => {
                debug!("source exhausted");
                break;
            }
        }
        ctx.diagnostics.groups_in.fetch_add(1, Ordering::Relaxed);

        // ── 2. Decimate to one PCM sample ─────────────────────────────────
        let sample = ctx.decimator.decimate(&group);
        ctx.diagnostics.pcm_samples.fetch_add(1, Ordering::Relaxed);

        // ── 3. Store; hand the buffer off when it fills ───────────────────
        let Some(req) = ctx.writer.write(sample) else {
            continue;
        };
        ctx.diagnostics.swaps.fetch_add(1, Ordering::Relaxed);

        match ctx.scheduler.notify(req) {
            NotifyOutcome::Queued => {}
            NotifyOutcome::Overflowed => {
                ctx.diagnostics.drain_overruns.fetch_add(1, Ordering::Relaxed);
                if ctx.deadline_policy == DeadlinePolicy::Fatal {
                    ctx.failure
                        .record(CaptureError::DrainOverrun { buffer: req.buffer });
                    ctx.running.store(false, Ordering::SeqCst);
                    break;
                }
                warn!(
                    buffer = req.buffer,
                    generation = req.generation,
                    "drain queue full; buffer will be overwritten undrained"
                );
            }
            NotifyOutcome::Suppressed => {
                debug!("drain scheduler stopped; ending capture");
                break;
            }
        }
    }

    // ── 4. Hand off any partial fill, then release the drain thread ──────
    if ctx.flush_partial_on_stop && !ctx.failure.is_set() {
        if let Some(req) = ctx.writer.flush_partial() {
            match ctx.scheduler.notify(req) {
                NotifyOutcome::Queued => debug!(len = req.len, "partial buffer queued on stop"),
                NotifyOutcome::Overflowed => {
                    ctx.diagnostics.drain_overruns.fetch_add(1, Ordering::Relaxed);
                    warn!(len = req.len, "drain queue full; partial buffer dropped");
                }
                NotifyOutcome::Suppressed => {}
            }
        }
    }
    ctx.scheduler.shutdown();

    let snap = ctx.diagnostics.snapshot();
    info!(
        groups_in = snap.groups_in,
        pcm_samples = snap.pcm_samples,
        swaps = snap.swaps,
        hardware_overflows = snap.hardware_overflows,
        drain_overruns = snap.drain_overruns,
        "producer stopped — diagnostics"
    );
}

/// All context the drain loop needs.
pub struct DrainContext<K: PcmSink> {
    pub reader: BufferReader,
    pub receiver: DrainReceiver,
    pub sink: K,
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<CaptureDiagnostics>,
    pub failure: FailureSlot,
    pub deadline_policy: DeadlinePolicy,
}

/// Run the drain loop until the scheduler shuts down and the queue empties.
///
/// The sink is finalized on the way out regardless of how the loop ended,
/// so a failed session still leaves a structurally valid file behind.
pub fn run_drain<K: PcmSink>(mut ctx: DrainContext<K>) {
    info!("drain started");

    let mut scratch: Vec<u8> = Vec::with_capacity(ctx.reader.capacity());

    while let Some(req) = ctx.receiver.recv() {
        // ── 1. Copy the filled buffer out, verifying its generation ───────
        if let Err(miss) = ctx.reader.read(&req, &mut scratch) {
            ctx.diagnostics
                .deadline_misses
                .fetch_add(1, Ordering::Relaxed);
            match ctx.deadline_policy {
                DeadlinePolicy::Fatal => {
                    error!(
                        buffer = miss.buffer,
                        expected = miss.expected,
                        observed = miss.observed,
                        "drain deadline missed; failing the session"
                    );
                    ctx.failure.record(miss.into());
                    ctx.running.store(false, Ordering::SeqCst);
                    ctx.receiver.finished();
                    break;
                }
                DeadlinePolicy::Degrade => {
                    warn!(
                        buffer = miss.buffer,
                        expected = miss.expected,
                        observed = miss.observed,
                        "drain deadline missed; writing degraded audio"
                    );
                }
            }
        }

        // ── 2. Persist ────────────────────────────────────────────────────
        if let Err(error) = ctx.sink.write(&scratch) {
            error!(error = %error, "sink write failed; stopping capture");
            ctx.failure.record(error);
            ctx.running.store(false, Ordering::SeqCst);
            ctx.receiver.finished();
            break;
        }

        ctx.diagnostics.drains.fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics
            .bytes_drained
            .fetch_add(req.len as u64, Ordering::Relaxed);
        ctx.receiver.finished();
    }

    if let Err(error) = ctx.sink.finalize() {
        error!(error = %error, "sink finalize failed");
        ctx.failure.record(error);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        drains = snap.drains,
        bytes_drained = snap.bytes_drained,
        deadline_misses = snap.deadline_misses,
        "drain stopped — diagnostics"
    );
}
