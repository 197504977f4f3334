//! Error taxonomy of the transfer subsystem.
//!
//! Only [`BlockwiseError::MaxAttemptsExceeded`] and [`BlockwiseError::DeadlineExceeded`] are
//!  fatal to a transfer; everything else is local and recoverable.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockwiseError {
    /// A frame arrived above the receive window. Callers drop the frame without touching
    ///  transfer state.
    #[error("frame #{sequence_number} outside receive window [{window_offset}, {window_end})")]
    InvalidFrameIndex {
        sequence_number: u32,
        window_offset: u32,
        window_end: u32,
    },

    /// A frame arrived below the receive window, i.e. it was already drained. Callers re-send
    ///  the acknowledgement for it (the previous one may have been lost) but must not mutate
    ///  transfer state.
    #[error("frame #{sequence_number} below receive window offset {window_offset} - already drained")]
    StaleFrame {
        sequence_number: u32,
        window_offset: u32,
    },

    /// A frame exhausted its retry budget. Fatal to the whole transfer.
    #[error("frame #{sequence_number} was sent {max_attempts} times without acknowledgement")]
    MaxAttemptsExceeded {
        sequence_number: u32,
        max_attempts: u32,
    },

    /// An acknowledgement arrived for a token/peer combination without a live transfer. Ignored.
    #[error("no live transfer for this token / peer combination")]
    TransferNotFound,

    /// The configured overall deadline for a transfer passed before it completed. Fatal.
    #[error("transfer deadline exceeded")]
    DeadlineExceeded,
}
