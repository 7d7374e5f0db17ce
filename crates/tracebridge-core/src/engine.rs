//! Contract with the external trace decoding engine.
//!
//! The engine parses the frame-formatted CoreSight byte stream and reports one
//! [`TraceElement`] per decoded occurrence to an [`ElementSink`], synchronously,
//! from inside [`TraceEngine::process`]. Nothing in this crate reimplements the
//! engine; this module only fixes the shapes that cross the boundary.

use std::fmt;
use std::path::Path;

use crate::config::DecoderConfig;

/// Kinds of generic element the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum ElementType {
    #[default]
    Unknown,
    NoSync,
    TraceOn,
    /// Trace discontinuity: tracing stopped at `st_addr`.
    TraceOff,
    EndOfTrace,
    PeContext,
    InstrRange,
    InstrRangeNoPath,
    AddrNotAccessible,
    AddrUnknown,
    Exception,
    ExceptionReturn,
    Timestamp,
    CycleCount,
    Event,
    SwTrace,
    SyncMarker,
    MemoryTransaction,
    InstrumentationTrace,
    Custom,
}

/// Engine classification of the last instruction in a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InstrType {
    /// Not a branch, or not classified.
    #[default]
    Other,
    /// Direct branch, including branch-with-link.
    Br,
    /// Indirect branch.
    BrIndirect,
    /// Instruction synchronisation barrier.
    Isb,
    /// Data barrier.
    DsbDmb,
    /// Wait-for-interrupt or wait-for-event.
    WfiWfe,
    /// Transaction start.
    Tstart,
}

/// Processing-element context attached to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PeContext {
    /// Context ID reported by the trace source.
    pub ctxt_id: u32,
    /// `true` when `ctxt_id` carries a value.
    pub ctxt_id_valid: bool,
    /// Virtual machine ID.
    pub vmid: u32,
    /// `true` when `vmid` carries a value.
    pub vmid_valid: bool,
    /// `true` when the core was executing in AArch64 state.
    pub bits64: bool,
}

/// One decoded element, as produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TraceElement {
    /// Element kind.
    pub elem_type: ElementType,
    /// Start address.
    pub st_addr: u64,
    /// Exclusive end address for ranges.
    pub en_addr: u64,
    /// Classification of the last instruction in a range.
    pub last_instr_type: InstrType,
    /// Timestamp in nanoseconds, 0 if unavailable.
    pub timestamp: u64,
    /// Processing-element context.
    pub context: PeContext,
    /// Exception number for exception elements.
    pub exception_number: u32,
}

impl TraceElement {
    /// Creates an element of the given type with zeroed fields.
    #[must_use]
    pub fn new(elem_type: ElementType) -> Self {
        Self {
            elem_type,
            ..Self::default()
        }
    }
}

/// Reply a sink gives the engine after each element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatapathResponse {
    /// Keep decoding.
    Continue,
    /// Abort the current operation; the engine must stop calling back.
    FatalSysError,
}

impl DatapathResponse {
    /// Returns `true` when the engine must abort.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::FatalSysError)
    }
}

/// Receiver of decoded elements.
pub trait ElementSink {
    /// Handles one element reported at byte `index` for the given trace ID.
    fn on_element(&mut self, index: u64, trace_id: u8, element: &TraceElement)
        -> DatapathResponse;
}

/// How an [`EngineStatus`] is treated by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// Operation completed.
    Success,
    /// Non-fatal condition; consumed byte count is still valid.
    SoftIgnorable,
    /// Session must latch an error.
    Fatal,
}

/// Closed set of statuses the engine may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum EngineStatus {
    /// No error.
    #[error("no error")]
    Ok = 0,
    /// General failure.
    #[error("general failure")]
    Fail = 1,
    /// Engine could not allocate memory.
    #[error("memory allocation failure")]
    Memory = 2,
    /// Component used before initialisation.
    #[error("component not initialised")]
    NotInitialised = 3,
    /// Trace source ID is invalid.
    #[error("invalid trace source id")]
    InvalidId = 4,
    /// Handle passed to the engine is invalid.
    #[error("invalid handle")]
    BadHandle = 5,
    /// A parameter value is out of range.
    #[error("invalid parameter value")]
    InvalidParam = 6,
    /// A memory image file could not be opened.
    #[error("file access error")]
    FileError = 7,
    /// Packet type not supported by this decoder.
    #[error("unsupported decode packet")]
    UnsupportedDecodePacket = 8,
    /// Packets arrived in an impossible order.
    #[error("bad packet sequence")]
    BadPacketSequence = 9,
    /// Packet content could not be decoded.
    #[error("bad decode packet")]
    BadDecodePacket = 10,
    /// Decoder cannot continue.
    #[error("fatal data decode error")]
    DataDecodeFatal = 11,
    /// New memory image overlaps an existing one.
    #[error("memory accessor range overlap")]
    MemoryAccessOverlap = 12,
    /// Flush drained all buffered state.
    #[error("flush complete")]
    FlushComplete = 13,
}

impl EngineStatus {
    /// Stable numeric value used across host boundaries.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Maps a numeric value back to a known status.
    #[must_use]
    pub const fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Fail),
            2 => Some(Self::Memory),
            3 => Some(Self::NotInitialised),
            4 => Some(Self::InvalidId),
            5 => Some(Self::BadHandle),
            6 => Some(Self::InvalidParam),
            7 => Some(Self::FileError),
            8 => Some(Self::UnsupportedDecodePacket),
            9 => Some(Self::BadPacketSequence),
            10 => Some(Self::BadDecodePacket),
            11 => Some(Self::DataDecodeFatal),
            12 => Some(Self::MemoryAccessOverlap),
            13 => Some(Self::FlushComplete),
            _ => None,
        }
    }

    /// Classifies the status for session error handling.
    #[must_use]
    pub const fn disposition(self) -> StatusClass {
        match self {
            Self::Ok | Self::FlushComplete => StatusClass::Success,
            Self::UnsupportedDecodePacket => StatusClass::SoftIgnorable,
            Self::Fail
            | Self::Memory
            | Self::NotInitialised
            | Self::InvalidId
            | Self::BadHandle
            | Self::InvalidParam
            | Self::FileError
            | Self::BadPacketSequence
            | Self::BadDecodePacket
            | Self::DataDecodeFatal
            | Self::MemoryAccessOverlap => StatusClass::Fatal,
        }
    }

    /// Converts a status into a `Result`, treating only success as `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `self` when the status is not a success.
    pub const fn into_result(self) -> Result<(), Self> {
        match self.disposition() {
            StatusClass::Success => Ok(()),
            StatusClass::SoftIgnorable | StatusClass::Fatal => Err(self),
        }
    }
}

/// Layout of the incoming byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// Frame-formatted multi-source stream.
    FrameFormatted {
        /// Frames are aligned to memory (no sync markers between frames).
        mem_aligned: bool,
    },
    /// Raw single-trace-ID stream.
    Single,
}

/// Source format every session requests: the output of an ETR/ETF sink.
pub const SESSION_SOURCE_FORMAT: SourceFormat =
    SourceFormat::FrameFormatted { mem_aligned: true };

/// Data-path operation requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataOp {
    /// Decode the supplied bytes.
    Data,
    /// Emit any buffered-but-undelivered elements.
    Flush,
}

/// Memory-space tag attached to registered images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemorySpace {
    /// Matches every exception level and security state.
    #[default]
    Any,
}

/// Inclusive address range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    /// First address.
    pub start: u64,
    /// Last address, inclusive.
    pub end: u64,
}

impl AddressRange {
    /// Builds the range covering `size` bytes from `start`.
    ///
    /// Returns `None` when `size` is zero or the range would pass `u64::MAX`.
    #[must_use]
    pub const fn from_base_size(start: u64, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }
        match start.checked_add(size - 1) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// Returns `true` when `addr` lies inside the range.
    #[must_use]
    pub const fn contains(self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..={:#x}", self.start, self.end)
    }
}

/// Result of one [`TraceEngine::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessOutcome {
    /// Engine status.
    pub status: EngineStatus,
    /// Bytes consumed from the supplied buffer.
    pub consumed: usize,
}

impl ProcessOutcome {
    /// Successful outcome that consumed `consumed` bytes.
    #[must_use]
    pub const fn ok(consumed: usize) -> Self {
        Self {
            status: EngineStatus::Ok,
            consumed,
        }
    }
}

/// A decode tree owned by one session.
pub trait TraceEngine {
    /// Creates the protocol decoder described by `config` inside the tree.
    ///
    /// # Errors
    ///
    /// Returns the engine status when the configuration is rejected.
    fn create_decoder(&mut self, config: &DecoderConfig) -> Result<(), EngineStatus>;

    /// Registers a file-backed memory image for instruction fetches.
    ///
    /// # Errors
    ///
    /// Returns the engine status when the mapping is rejected.
    fn add_memory_image(
        &mut self,
        range: AddressRange,
        space: MemorySpace,
        path: &Path,
        file_offset: u64,
    ) -> Result<(), EngineStatus>;

    /// Runs one data-path operation, reporting elements to `sink`.
    ///
    /// `index` is the byte offset of `data` in the overall stream. The engine
    /// must stop calling `sink` once it answers
    /// [`DatapathResponse::FatalSysError`].
    fn process(
        &mut self,
        op: DataOp,
        index: u64,
        data: &[u8],
        sink: &mut dyn ElementSink,
    ) -> ProcessOutcome;
}

/// Constructor for decode trees.
pub trait EngineFactory {
    /// Engine type produced by this factory.
    type Engine: TraceEngine;

    /// Creates an empty decode tree for the given source format.
    ///
    /// # Errors
    ///
    /// Returns the engine status when the tree cannot be created.
    fn create_tree(&mut self, format: SourceFormat) -> Result<Self::Engine, EngineStatus>;
}

impl<E, F> EngineFactory for F
where
    E: TraceEngine,
    F: FnMut(SourceFormat) -> Result<E, EngineStatus>,
{
    type Engine = E;

    fn create_tree(&mut self, format: SourceFormat) -> Result<E, EngineStatus> {
        self(format)
    }
}
