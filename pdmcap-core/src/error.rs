use thiserror::Error;

/// All errors produced by pdmcap-core.
///
/// Raw-word FIFO overflows are deliberately absent: the hardware contract
/// treats them as a recoverable gap, so they are counted in
/// [`crate::capture::CaptureDiagnostics`] instead of failing the session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture configuration: {0}")]
    Config(String),

    #[error(
        "drain deadline missed on buffer {buffer}: generation advanced \
         from {expected} to {observed} during drain"
    )]
    DeadlineMiss {
        buffer: usize,
        expected: u64,
        observed: u64,
    },

    #[error("drain queue overflowed; buffer {buffer} was refilled before it could be drained")]
    DrainOverrun { buffer: usize },

    #[error("recorder is already running")]
    AlreadyRunning,

    #[error("recorder is not running")]
    NotRunning,

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
