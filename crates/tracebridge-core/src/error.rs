//! Error taxonomy and the per-session error latch.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::DecoderKind;
use crate::engine::EngineStatus;
use crate::queue::QueueError;

/// Longest message the latch keeps, in bytes.
pub const MAX_ERROR_MESSAGE_LEN: usize = 255;

/// Errors surfaced by decode sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Session storage could not be allocated.
    #[error("allocation failed: {0}")]
    AllocationFailure(QueueError),
    /// The engine could not create a decode tree.
    #[error("decode tree creation failed: {0}")]
    TreeCreation(EngineStatus),
    /// The engine rejected the requested decoder configuration.
    #[error("create decoder {decoder} failed: {status}")]
    ConfigurationFailure {
        /// Decoder that was requested.
        decoder: DecoderKind,
        /// Engine status.
        status: EngineStatus,
    },
    /// A memory image registration was refused.
    #[error("add memory image failed for {}: {status}", path.display())]
    ImageRejected {
        /// Image path.
        path: PathBuf,
        /// Engine status, or `InvalidParam` for locally rejected ranges.
        status: EngineStatus,
    },
    /// The engine failed while decoding data.
    #[error("decode error at index {index}: {status}")]
    DecodeFatal {
        /// Stream offset of the failed buffer.
        index: u64,
        /// Engine status.
        status: EngineStatus,
    },
    /// The engine failed while flushing.
    #[error("flush failed: {status}")]
    FlushFatal {
        /// Engine status.
        status: EngineStatus,
    },
    /// The event queue could not grow during decode.
    #[error("event buffer exhausted: {0}")]
    QueueExhausted(QueueError),
    /// The session was already destroyed.
    #[error("session destroyed")]
    Destroyed,
}

impl DecodeError {
    /// Returns `true` for errors that latch session-wide state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ImageRejected { .. } | Self::Destroyed)
    }
}

/// Write-once fatal error state of one session.
///
/// The first latched error and its message are kept until the session is
/// dropped. Later fatal conditions only bump the suppressed counter.
#[derive(Debug, Clone, Default)]
pub struct ErrorLatch {
    first: Option<(DecodeError, String)>,
    suppressed: usize,
}

impl ErrorLatch {
    /// Creates a clear latch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: None,
            suppressed: 0,
        }
    }

    /// Latches `error` unless an earlier error is already held.
    ///
    /// Returns the error that is latched after the call.
    pub fn latch(&mut self, error: DecodeError) -> &DecodeError {
        if let Some((first, _)) = &self.first {
            self.suppressed = self.suppressed.saturating_add(1);
            log::warn!("error already latched ({first}); suppressing: {error}");
        }

        let (held, _) = self.first.get_or_insert_with(|| {
            let message = bounded_message(&error);
            log::warn!("latching session error: {message}");
            (error, message)
        });
        held
    }

    /// Returns `true` once any fatal error was latched.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.first.is_some()
    }

    /// The first latched error.
    #[must_use]
    pub fn error(&self) -> Option<&DecodeError> {
        self.first.as_ref().map(|(error, _)| error)
    }

    /// Message of the first latched error, at most [`MAX_ERROR_MESSAGE_LEN`] bytes.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.first.as_ref().map(|(_, message)| message.as_str())
    }

    /// Number of fatal conditions reported after the first one.
    #[must_use]
    pub const fn suppressed(&self) -> usize {
        self.suppressed
    }
}

fn bounded_message(error: &DecodeError) -> String {
    let mut message = error.to_string();
    if message.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::{DecodeError, ErrorLatch, MAX_ERROR_MESSAGE_LEN};
    use crate::engine::EngineStatus;
    use crate::queue::QueueError;
    use std::path::PathBuf;

    #[test]
    fn clear_latch_reports_nothing() {
        let latch = ErrorLatch::new();
        assert!(!latch.is_set());
        assert!(latch.error().is_none());
        assert!(latch.message().is_none());
        assert_eq!(latch.suppressed(), 0);
    }

    #[test]
    fn first_error_wins_and_later_ones_are_counted() {
        let mut latch = ErrorLatch::new();
        let first = DecodeError::DecodeFatal {
            index: 0x40,
            status: EngineStatus::BadPacketSequence,
        };
        latch.latch(first.clone());
        let held = latch
            .latch(DecodeError::FlushFatal {
                status: EngineStatus::DataDecodeFatal,
            })
            .clone();

        assert_eq!(held, first);
        assert_eq!(latch.error(), Some(&first));
        assert_eq!(
            latch.message(),
            Some("decode error at index 64: bad packet sequence")
        );
        assert_eq!(latch.suppressed(), 1);
    }

    #[test]
    fn long_messages_are_truncated_on_char_boundary() {
        let path = PathBuf::from(format!("/lib/{}", "é".repeat(200)));
        let mut latch = ErrorLatch::new();
        latch.latch(DecodeError::ImageRejected {
            path,
            status: EngineStatus::FileError,
        });

        let message = latch.message().expect("latched message");
        assert!(message.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(message.starts_with("add memory image failed for /lib/"));
    }

    #[test]
    fn fatal_classification_matches_taxonomy() {
        assert!(DecodeError::QueueExhausted(QueueError::LimitReached { limit: 8 }).is_fatal());
        assert!(DecodeError::TreeCreation(EngineStatus::Memory).is_fatal());
        assert!(!DecodeError::Destroyed.is_fatal());
        assert!(!DecodeError::ImageRejected {
            path: PathBuf::from("/bin/true"),
            status: EngineStatus::MemoryAccessOverlap,
        }
        .is_fatal());
    }

    #[test]
    fn display_strings_name_the_engine_status() {
        assert_eq!(
            DecodeError::TreeCreation(EngineStatus::Memory).to_string(),
            "decode tree creation failed: memory allocation failure"
        );
        assert_eq!(
            DecodeError::FlushFatal {
                status: EngineStatus::Fail
            }
            .to_string(),
            "flush failed: general failure"
        );
    }
}
