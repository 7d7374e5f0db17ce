//! Host-facing session handle with idempotent destruction.

use std::path::Path;

use crate::config::SessionConfig;
use crate::engine::{EngineFactory, TraceEngine};
use crate::error::DecodeError;
use crate::event::Event;
use crate::session::{DecodeSession, SessionState};

/// Owning handle that outlives its session.
///
/// Hosts hold a handle rather than the session itself so that a second
/// `destroy` is a harmless no-op and calls after destruction report
/// [`DecodeError::Destroyed`] instead of touching freed state.
#[derive(Debug)]
pub struct SessionHandle<E> {
    session: Option<DecodeSession<E>>,
}

impl<E: TraceEngine> SessionHandle<E> {
    /// Creates a session behind a new handle.
    ///
    /// # Errors
    ///
    /// Propagates creation failures from [`DecodeSession::create`].
    pub fn create<F>(factory: F, config: SessionConfig) -> Result<Self, DecodeError>
    where
        F: EngineFactory<Engine = E>,
    {
        DecodeSession::create(factory, config).map(Self::from)
    }

    /// Borrows the live session.
    #[must_use]
    pub const fn session(&self) -> Option<&DecodeSession<E>> {
        self.session.as_ref()
    }

    fn live(&mut self) -> Result<&mut DecodeSession<E>, DecodeError> {
        self.session.as_mut().ok_or(DecodeError::Destroyed)
    }

    /// See [`DecodeSession::add_image`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Destroyed`] after destruction.
    pub fn add_image(
        &mut self,
        path: impl AsRef<Path>,
        load_address: u64,
        file_offset: u64,
        size: u64,
    ) -> Result<(), DecodeError> {
        self.live()?.add_image(path, load_address, file_offset, size)
    }

    /// See [`DecodeSession::feed`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Destroyed`] after destruction.
    pub fn feed(&mut self, data: &[u8], index: u64) -> Result<usize, DecodeError> {
        self.live()?.feed(data, index)
    }

    /// See [`DecodeSession::flush`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Destroyed`] after destruction.
    pub fn flush(&mut self) -> Result<(), DecodeError> {
        self.live()?.flush()
    }

    /// Pops the oldest event; always `None` once destroyed.
    pub fn next_event(&mut self) -> Option<Event> {
        self.session.as_mut().and_then(DecodeSession::next_event)
    }

    /// Latched-error flag; `false` once destroyed.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.session.as_ref().is_some_and(DecodeSession::has_error)
    }

    /// Latched error message; `None` once destroyed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.session.as_ref().and_then(DecodeSession::error_message)
    }

    /// Lifecycle state, [`SessionState::Destroyed`] once destroyed.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Destroyed, DecodeSession::state)
    }

    /// Releases the session. Returns `false` when it was already released.
    pub fn destroy(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            log::trace!("destroy on an already destroyed session handle");
            return false;
        };
        session.destroy();
        true
    }
}

impl<E> From<DecodeSession<E>> for SessionHandle<E> {
    fn from(session: DecodeSession<E>) -> Self {
        Self {
            session: Some(session),
        }
    }
}
