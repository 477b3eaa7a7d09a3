//! Double-buffered PCM sample store.
//!
//! Two fixed-size byte buffers alternate between an *active* role (the
//! producer appends decimated samples at a cursor) and an *inactive* role
//! (handed to the drain side as a [`DrainRequest`] when it fills).
//! Interrupt-driven firmware keeps these buffers, the cursor and the active
//! flag in globals shared with the handler; here they live behind a
//! writer/reader pair returned by [`double_buffer`], so each half owns
//! exactly the state its context is allowed to touch.
//!
//! ## Protocol
//!
//! The writer runs in the producer context; the cursor and active index are
//! plain fields because that context is the only one that mutates them. The
//! reader only ever copies out of a buffer that a `DrainRequest` named, and
//! the request's generation tag lets it prove the producer has not lapped it
//! mid-copy. Bytes are `AtomicU8` cells so a missed drain deadline stays an
//! observable data race (torn samples, flagged as [`DeadlineMiss`]) rather
//! than undefined behavior.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

/// Handoff token emitted once per buffer swap.
///
/// Names the buffer that just filled, the fill generation it completed, and
/// how many bytes are valid (`len` is only short of the full capacity for a
/// residual flush at stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainRequest {
    /// Index of the buffer to drain (0 or 1).
    pub buffer: usize,
    /// Fill generation the buffer completed when the request was emitted.
    pub generation: u64,
    /// Number of valid bytes, counted from the start of the buffer.
    pub len: usize,
}

/// Returned by [`BufferReader::read`] when the producer started refilling a
/// buffer before its drain finished.
///
/// The drained bytes were still copied out, but some of them belong to the
/// newer fill. Whether that is fatal is the caller's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineMiss {
    /// Buffer whose drain was overrun.
    pub buffer: usize,
    /// Generation recorded in the drain request.
    pub expected: u64,
    /// Generation observed after the copy.
    pub observed: u64,
}

impl From<DeadlineMiss> for crate::error::CaptureError {
    fn from(miss: DeadlineMiss) -> Self {
        crate::error::CaptureError::DeadlineMiss {
            buffer: miss.buffer,
            expected: miss.expected,
            observed: miss.observed,
        }
    }
}

/// State shared by the two halves: the byte cells and per-buffer fill
/// generation counters.
struct BufferShared {
    cells: [Box<[AtomicU8]>; 2],
    /// How many times the producer has started filling each buffer.
    generations: [AtomicU64; 2],
}

/// Create a matched writer/reader pair over two `capacity`-byte buffers.
///
/// Both buffers are allocated here, once; nothing allocates after this call,
/// which is what lets the writer live on the time-critical producer path.
///
/// # Panics
/// Panics if `capacity` is zero. `CaptureConfig::validate` rejects that
/// before a recorder ever gets here.
pub fn double_buffer(capacity: usize) -> (BufferWriter, BufferReader) {
    assert!(capacity > 0, "buffer capacity must be non-zero");

    let cell_row = || (0..capacity).map(|_| AtomicU8::new(0)).collect();
    let shared = Arc::new(BufferShared {
        cells: [cell_row(), cell_row()],
        // Buffer 0 starts in the active role, already on its first fill.
        generations: [AtomicU64::new(1), AtomicU64::new(0)],
    });

    (
        BufferWriter {
            shared: Arc::clone(&shared),
            active: 0,
            cursor: 0,
        },
        BufferReader { shared },
    )
}

/// Producer half: appends samples to the active buffer and swaps roles when
/// it fills.
pub struct BufferWriter {
    shared: Arc<BufferShared>,
    /// Index of the buffer currently being filled.
    active: usize,
    /// Next write offset into the active buffer, in `[0, capacity)`.
    cursor: usize,
}

impl BufferWriter {
    /// Append one PCM sample.
    ///
    /// Returns `Some(DrainRequest)` exactly when this write filled the
    /// active buffer: the cursor wraps to 0, the roles flip, and the request
    /// names the buffer that just became inactive. The caller hands the
    /// request to the drain scheduler; this type never blocks or allocates.
    #[inline]
    pub fn write(&mut self, sample: u8) -> Option<DrainRequest> {
        self.shared.cells[self.active][self.cursor].store(sample, Ordering::Relaxed);
        self.cursor += 1;
        if self.cursor < self.capacity() {
            return None;
        }

        self.cursor = 0;
        let filled = self.active;
        let generation = self.shared.generations[filled].load(Ordering::Relaxed);
        self.active ^= 1;
        // The newly active buffer begins its next fill; bumping its
        // generation is what lets a straggling drain of that buffer detect
        // the overlap.
        self.shared.generations[self.active].fetch_add(1, Ordering::Release);

        Some(DrainRequest {
            buffer: filled,
            generation,
            len: self.capacity(),
        })
    }

    /// Emit the partially filled active buffer without swapping.
    ///
    /// Used at stop when the session is configured to keep the residual
    /// samples. `None` when the cursor sits at 0 (nothing to flush). The
    /// cursor is left in place; writing again after a partial flush
    /// overwrites the flushed region, so callers only invoke this once the
    /// producer loop has exited.
    pub fn flush_partial(&mut self) -> Option<DrainRequest> {
        if self.cursor == 0 {
            return None;
        }
        Some(DrainRequest {
            buffer: self.active,
            generation: self.shared.generations[self.active].load(Ordering::Relaxed),
            len: self.cursor,
        })
    }

    /// Buffer capacity in bytes (the `L` of the capture config).
    pub fn capacity(&self) -> usize {
        self.shared.cells[0].len()
    }

    /// Current write offset into the active buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the buffer currently being filled.
    pub fn active(&self) -> usize {
        self.active
    }
}

/// Consumer half: copies a named inactive buffer out and verifies the
/// producer did not lap it.
pub struct BufferReader {
    shared: Arc<BufferShared>,
}

impl BufferReader {
    /// Copy `req.len` bytes of the named buffer into `out` (cleared first).
    ///
    /// After the copy the buffer's generation is compared against the
    /// request's. A mismatch means the producer started refilling the buffer
    /// while the drain was in flight: the copy still landed in `out`
    /// (degraded data), and the returned [`DeadlineMiss`] carries both
    /// generations for the caller's policy to act on.
    ///
    /// Requests come from the paired writer; a fabricated out-of-range
    /// buffer index or length panics on the slice access.
    pub fn read(&self, req: &DrainRequest, out: &mut Vec<u8>) -> Result<(), DeadlineMiss> {
        let cells = &self.shared.cells[req.buffer];
        out.clear();
        out.extend(cells[..req.len].iter().map(|c| c.load(Ordering::Relaxed)));

        let observed = self.shared.generations[req.buffer].load(Ordering::Acquire);
        if observed != req.generation {
            return Err(DeadlineMiss {
                buffer: req.buffer,
                expected: req.generation,
                observed,
            });
        }
        Ok(())
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.cells[0].len()
    }
}
