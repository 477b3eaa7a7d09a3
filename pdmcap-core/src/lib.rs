//! # pdmcap-core
//!
//! PDM microphone capture engine: raw pulse-density bitstream in, 8-bit
//! PCM WAV out.
//!
//! ## Architecture
//!
//! ```text
//! RawSampleSource → Decimator → BufferWriter ──swap──► DrainScheduler
//!  (pdm-producer thread)            (double buffer)         │ bounded queue
//!                                                           ▼
//!                         WAV file ◄── PcmSink ◄── BufferReader
//!                                  (pdm-drain thread)
//! ```
//!
//! The producer thread is paced by its source and never blocks on I/O: a
//! filled buffer is handed off as a [`buffer::DrainRequest`] over a bounded
//! queue and the producer keeps clocking samples into the other half of the
//! double buffer. The drain thread copies each filled buffer out, verifies
//! its generation tag (catching buffers overwritten before being persisted),
//! and writes the bytes to the sink.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffer;
pub mod capture;
pub mod decimate;
pub mod drain;
pub mod error;
pub mod source;
pub mod wav;

// Convenience re-exports for downstream crates
pub use buffer::{double_buffer, BufferReader, BufferWriter, DeadlineMiss, DrainRequest};
pub use capture::{
    CaptureConfig, CaptureDiagnostics, CaptureStatus, DeadlinePolicy, DiagnosticsSnapshot,
    PdmRecorder,
};
pub use decimate::{Decimator, RangePolicy};
pub use drain::{drain_pair, DrainReceiver, DrainScheduler, NotifyOutcome};
pub use error::{CaptureError, Result};
pub use source::{RawSampleSource, RawSampleWord, SourceRead, SyntheticPdmSource};
pub use wav::{PcmSink, WavWriter};
