//! Decode sessions: one engine, its images, its event queue and its error latch.
//!
//! A session is fed raw trace bytes and drained at the consumer's pace. The
//! engine reports elements synchronously from inside [`DecodeSession::feed`] and
//! [`DecodeSession::flush`]; the session hands it a [`Classifier`] borrowing the
//! queue and latch for exactly the duration of that call, so nothing outside the
//! session ever aliases either.
//!
//! Fatal conditions latch. A latched session refuses further feeding without
//! contacting the engine, but events decoded before the fault stay poppable.

use std::path::Path;

use crate::classify::Classifier;
use crate::config::SessionConfig;
use crate::engine::{
    DataOp, EngineFactory, EngineStatus, MemorySpace, ProcessOutcome, StatusClass, TraceEngine,
    SESSION_SOURCE_FORMAT,
};
use crate::error::{DecodeError, ErrorLatch};
use crate::event::Event;
use crate::image::MemoryImage;
use crate::queue::{Drain, EventQueue};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Queue and decode tree exist; decoder not yet built.
    Created,
    /// Decoder built, nothing fed yet.
    Configured,
    /// At least one feed or flush reached the engine.
    Feeding,
    /// A fatal error is latched; only draining and destruction remain.
    Errored,
    /// Session storage was released.
    Destroyed,
}

/// One decode session over a single trace source.
#[derive(Debug)]
pub struct DecodeSession<E> {
    config: SessionConfig,
    engine: E,
    images: Vec<MemoryImage>,
    queue: EventQueue,
    latch: ErrorLatch,
    state: SessionState,
}

impl<E: TraceEngine> DecodeSession<E> {
    /// Creates a session and builds its decoder.
    ///
    /// A decoder the engine refuses to build does not fail creation: the
    /// session is returned with a latched
    /// [`DecodeError::ConfigurationFailure`] so that the already-allocated
    /// parts can still be released normally. Check [`Self::has_error`] after
    /// creating.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::AllocationFailure`] when the event queue cannot
    /// be allocated and [`DecodeError::TreeCreation`] when the engine cannot
    /// create a decode tree.
    pub fn create<F>(mut factory: F, config: SessionConfig) -> Result<Self, DecodeError>
    where
        F: EngineFactory<Engine = E>,
    {
        let queue = match config.queue_limit {
            Some(limit) => EventQueue::with_limit(config.queue_capacity, limit),
            None => EventQueue::with_capacity(config.queue_capacity),
        }
        .map_err(DecodeError::AllocationFailure)?;

        let engine = factory
            .create_tree(SESSION_SOURCE_FORMAT)
            .map_err(DecodeError::TreeCreation)?;

        let mut session = Self {
            config,
            engine,
            images: Vec::new(),
            queue,
            latch: ErrorLatch::new(),
            state: SessionState::Created,
        };
        session.configure();
        Ok(session)
    }

    fn configure(&mut self) {
        if !self.config.trace_id_is_valid() {
            log::warn!(
                "trace id {:#04x} is outside 0x00..=0x7f; forwarding to the decoder unchanged",
                self.config.trace_id
            );
        }

        let decoder = self.config.decoder_config();
        match self.engine.create_decoder(&decoder) {
            Ok(()) => {
                log::debug!(
                    "created {} decoder for trace id {:#04x}",
                    decoder.arch.decoder,
                    decoder.trace_id
                );
                self.state = SessionState::Configured;
            }
            Err(status) => {
                self.fail(DecodeError::ConfigurationFailure {
                    decoder: decoder.arch.decoder,
                    status,
                });
            }
        }
    }

    /// Registers `size` bytes of `path` at `load_address` for instruction
    /// fetches.
    ///
    /// Failure is local to this call and does not latch.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ImageRejected`] when the range is empty or
    /// overflows, or when the engine refuses the mapping.
    pub fn add_image(
        &mut self,
        path: impl AsRef<Path>,
        load_address: u64,
        file_offset: u64,
        size: u64,
    ) -> Result<(), DecodeError> {
        let path = path.as_ref();
        let image = MemoryImage::new(path, load_address, file_offset, size).ok_or_else(|| {
            DecodeError::ImageRejected {
                path: path.to_path_buf(),
                status: EngineStatus::InvalidParam,
            }
        })?;

        self.engine
            .add_memory_image(image.range(), MemorySpace::Any, image.path(), file_offset)
            .map_err(|status| DecodeError::ImageRejected {
                path: path.to_path_buf(),
                status,
            })?;

        log::debug!(
            "registered memory image {} at {}",
            path.display(),
            image.range()
        );
        self.images.push(image);
        Ok(())
    }

    /// Feeds raw trace bytes located at `index` in the overall stream.
    ///
    /// Returns the number of bytes the engine consumed, which may be less
    /// than offered; resume feeding from that offset.
    ///
    /// # Errors
    ///
    /// Returns the latched error without contacting the engine when the
    /// session is already errored. A fatal engine status, or a queue that
    /// could not grow during the call, latches and returns the latched error.
    pub fn feed(&mut self, data: &[u8], index: u64) -> Result<usize, DecodeError> {
        self.check_latch()?;

        let outcome = self.run(DataOp::Data, index, data);
        self.settle(outcome.status, || DecodeError::DecodeFatal {
            index,
            status: outcome.status,
        })?;
        Ok(outcome.consumed.min(data.len()))
    }

    /// Asks the engine to emit any buffered elements.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Self::feed`].
    pub fn flush(&mut self) -> Result<(), DecodeError> {
        self.check_latch()?;

        let outcome = self.run(DataOp::Flush, 0, &[]);
        self.settle(outcome.status, || DecodeError::FlushFatal {
            status: outcome.status,
        })
    }

    /// Pops the oldest undelivered event.
    ///
    /// The error latch is not consulted: events decoded before a fault remain
    /// available.
    pub fn next_event(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Pops every queued event in order.
    pub fn drain(&mut self) -> Drain<'_> {
        self.queue.drain()
    }

    /// Returns `true` once a fatal error has been latched.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.latch.is_set()
    }

    /// Message of the first latched error.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.latch.message()
    }

    /// First latched error.
    #[must_use]
    pub fn error(&self) -> Option<&DecodeError> {
        self.latch.error()
    }

    /// Fatal conditions reported after the latched one.
    #[must_use]
    pub const fn suppressed_errors(&self) -> usize {
        self.latch.suppressed()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration the session was created with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Images registered so far, in registration order.
    #[must_use]
    pub fn images(&self) -> &[MemoryImage] {
        &self.images
    }

    /// Number of decoded events not yet popped.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Releases the engine and the queue, discarding undrained events.
    pub fn destroy(mut self) {
        let discarded = self.queue.clear();
        log::debug!(
            "destroying session for trace id {:#04x}; {discarded} undrained events discarded",
            self.config.trace_id
        );
    }

    fn check_latch(&self) -> Result<(), DecodeError> {
        self.latch.error().map_or(Ok(()), |error| Err(error.clone()))
    }

    fn run(&mut self, op: DataOp, index: u64, data: &[u8]) -> ProcessOutcome {
        if self.state == SessionState::Configured {
            self.state = SessionState::Feeding;
        }

        let mut sink = Classifier::new(&mut self.queue, &mut self.latch);
        self.engine.process(op, index, data, &mut sink)
    }

    fn settle(
        &mut self,
        status: EngineStatus,
        fatal: impl FnOnce() -> DecodeError,
    ) -> Result<(), DecodeError> {
        match status.disposition() {
            StatusClass::Success => {}
            StatusClass::SoftIgnorable => {
                log::debug!("engine reported non-fatal status: {status}");
            }
            StatusClass::Fatal => return Err(self.fail(fatal())),
        }

        // The classifier may have latched a queue failure mid-call.
        if self.latch.is_set() {
            self.state = SessionState::Errored;
        }
        self.check_latch()
    }

    fn fail(&mut self, error: DecodeError) -> DecodeError {
        self.state = SessionState::Errored;
        self.latch.latch(error).clone()
    }
}
