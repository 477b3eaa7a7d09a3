//! Raw PDM sample acquisition.
//!
//! The `RawSampleSource` trait is the seam between the capture engine and
//! whatever clocks the microphone: a hardware shift-register FIFO on a
//! target board, or [`SyntheticPdmSource`] on a host machine. The producer
//! thread is paced by its source — `next_group` blocks until the next group
//! of raw words exists, so the source's cadence *is* the sampling clock.

pub mod synthetic;

pub use synthetic::SyntheticPdmSource;

/// One raw sample word: 32 one-bit microphone readings, oldest bit first.
pub type RawSampleWord = u32;

/// Bit width of a [`RawSampleWord`].
pub const WORD_BITS: u32 = 32;

/// Outcome of one group acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRead {
    /// A full sample group was written into the caller's slice.
    Group,
    /// A group was delivered, but the source's FIFO overflowed since the
    /// last call and `dropped` older groups were lost. The capture
    /// continues with a gap; the engine counts the loss.
    GroupAfterOverflow { dropped: u32 },
    /// The source has no more groups. Hardware sources never return this;
    /// simulated sources use it to end a take deterministically.
    Exhausted,
}

/// Contract for raw PDM word producers.
///
/// Implementors fill the caller-provided group slice in place; the engine
/// allocates that slice once at start-up and reuses it, so conforming
/// sources must not assume a fresh buffer per call.
pub trait RawSampleSource: Send + 'static {
    /// Block until the next sample group is available and write it into
    /// `group`. The slice length is the configured group size
    /// (`oversample_ratio / 32`); it never changes during a capture.
    fn next_group(&mut self, group: &mut [RawSampleWord]) -> SourceRead;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_read_carries_drop_count() {
        let read = SourceRead::GroupAfterOverflow { dropped: 3 };
        match read {
            SourceRead::GroupAfterOverflow { dropped } => assert_eq!(dropped, 3),
            _ => panic!("expected overflow variant"),
        }
    }
}
