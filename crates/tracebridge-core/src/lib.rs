//! Pull-based event bridge for callback-driven CoreSight trace decoders.
//!
//! A decode engine pushes generic trace elements through a callback while it
//! consumes raw trace bytes. This crate turns that push stream into a queue of
//! flat control-flow [`Event`]s that a host pops at its own pace, latching the
//! first fatal decode or allocation failure per session.

/// Flat control-flow events and their stable wire form.
pub mod event;
pub use event::{Event, EventKind, FlatEvent, UnknownEventKind, NO_TIMESTAMP, UNKNOWN_CPU};

/// Growable circular event queue.
pub mod queue;
pub use queue::{Drain, EventQueue, QueueError, DEFAULT_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};

/// Decode engine boundary: element model, status codes and engine traits.
pub mod engine;
pub use engine::{
    AddressRange, DataOp, DatapathResponse, ElementSink, ElementType, EngineFactory,
    EngineStatus, InstrType, MemorySpace, PeContext, ProcessOutcome, SourceFormat, StatusClass,
    TraceElement, TraceEngine, SESSION_SOURCE_FORMAT,
};

/// Session configuration and per-architecture decoder payloads.
pub mod config;
pub use config::{
    ArchConfig, ArchVersion, CoreArch, CoreProfile, DecoderConfig, DecoderKind, EtmV3Registers,
    EtmV4Registers, RegisterPayload, SessionConfig, ETE_CONFIG, ETMV3_CONFIG, ETMV4_CONFIG,
    MAX_TRACE_ID,
};

/// Error taxonomy and the first-error latch.
pub mod error;
pub use error::{DecodeError, ErrorLatch, MAX_ERROR_MESSAGE_LEN};

/// Element classification into events.
pub mod classify;
pub use classify::{classify, Classifier};

/// File-backed memory images.
pub mod image;
pub use image::MemoryImage;

/// Decode session lifecycle.
pub mod session;
pub use session::{DecodeSession, SessionState};
/// Idempotent host handle over a session.
pub mod handle;
pub use handle::SessionHandle;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
