//! Flat decoded-event model handed to pull-based consumers.

/// Timestamp reported when the decoder had no time information.
pub const NO_TIMESTAMP: u64 = 0;

/// CPU index reported when the source core is unknown.
pub const UNKNOWN_CPU: i32 = -1;

/// One decoded occurrence, held by value in the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Event {
    /// What happened, with its addresses.
    pub kind: EventKind,
    /// Nanoseconds since the decoder's epoch, [`NO_TIMESTAMP`] if unavailable.
    pub timestamp: u64,
    /// Logical core index, [`UNKNOWN_CPU`] if unknown.
    pub cpu: i32,
}

impl Event {
    /// Creates an event with the given kind, timestamp and CPU.
    #[must_use]
    pub const fn new(kind: EventKind, timestamp: u64, cpu: i32) -> Self {
        Self {
            kind,
            timestamp,
            cpu,
        }
    }

    /// Start address of the event.
    #[must_use]
    pub const fn from_addr(&self) -> u64 {
        self.kind.from_addr()
    }

    /// Exclusive end address, for range-shaped events.
    #[must_use]
    pub const fn to_addr(&self) -> Option<u64> {
        self.kind.to_addr()
    }
}

/// Closed set of decoded event kinds.
///
/// `to` is always exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventKind {
    /// A contiguous block of executed instructions.
    InstructionRange {
        /// First instruction address.
        from: u64,
        /// Address past the last executed instruction.
        to: u64,
    },
    /// Instruction range whose terminating branch was direct.
    Call {
        /// First instruction address.
        from: u64,
        /// Address past the terminating branch.
        to: u64,
    },
    /// Instruction range whose terminating branch was indirect.
    Return {
        /// First instruction address.
        from: u64,
        /// Address past the terminating branch.
        to: u64,
    },
    /// Tracing resumed at this address.
    TraceOn {
        /// Resume address.
        from: u64,
    },
    /// Tracing ceased at this address.
    TraceOff {
        /// Last known address.
        from: u64,
    },
    /// An exception or interrupt was taken.
    Exception {
        /// Preferred return address reported by the decoder.
        from: u64,
        /// Decoder-reported exception number.
        number: u32,
    },
    /// Return from an exception handler.
    ExceptionReturn {
        /// Address reported by the decoder.
        from: u64,
    },
}

impl EventKind {
    /// Stable numeric code used by flat host records.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::InstructionRange { .. } => 0,
            Self::Call { .. } => 1,
            Self::Return { .. } => 2,
            Self::TraceOn { .. } => 3,
            Self::TraceOff { .. } => 4,
            Self::Exception { .. } => 5,
            Self::ExceptionReturn { .. } => 6,
        }
    }

    /// Start address carried by every kind.
    #[must_use]
    pub const fn from_addr(self) -> u64 {
        match self {
            Self::InstructionRange { from, .. }
            | Self::Call { from, .. }
            | Self::Return { from, .. }
            | Self::TraceOn { from }
            | Self::TraceOff { from }
            | Self::Exception { from, .. }
            | Self::ExceptionReturn { from } => from,
        }
    }

    /// Exclusive end address for range-shaped kinds.
    #[must_use]
    pub const fn to_addr(self) -> Option<u64> {
        match self {
            Self::InstructionRange { to, .. } | Self::Call { to, .. } | Self::Return { to, .. } => {
                Some(to)
            }
            Self::TraceOn { .. }
            | Self::TraceOff { .. }
            | Self::Exception { .. }
            | Self::ExceptionReturn { .. } => None,
        }
    }

    /// Returns `true` for the three instruction-range kinds.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(
            self,
            Self::InstructionRange { .. } | Self::Call { .. } | Self::Return { .. }
        )
    }
}

/// Fixed-layout event record for hosts that cannot consume Rust enums.
///
/// Field order matches the record the managed host expects:
/// kind, timestamp, from, to, cpu, exception number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FlatEvent {
    /// Stable kind code, see [`EventKind::code`].
    pub kind: u8,
    /// Nanosecond timestamp, 0 if unavailable.
    pub timestamp: u64,
    /// Start address.
    pub from_addr: u64,
    /// Exclusive end address, 0 for non-range kinds.
    pub to_addr: u64,
    /// Source CPU, -1 if unknown.
    pub cpu: i32,
    /// Exception number, 0 unless `kind` is an exception.
    pub exception_number: u32,
}

impl From<Event> for FlatEvent {
    fn from(event: Event) -> Self {
        let exception_number = match event.kind {
            EventKind::Exception { number, .. } => number,
            _ => 0,
        };
        Self {
            kind: event.kind.code(),
            timestamp: event.timestamp,
            from_addr: event.kind.from_addr(),
            to_addr: event.kind.to_addr().unwrap_or(0),
            cpu: event.cpu,
            exception_number,
        }
    }
}

/// Error returned when a flat record carries an unassigned kind code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown event kind code {0}")]
pub struct UnknownEventKind(pub u8);

impl TryFrom<FlatEvent> for Event {
    type Error = UnknownEventKind;

    fn try_from(flat: FlatEvent) -> Result<Self, Self::Error> {
        let from = flat.from_addr;
        let to = flat.to_addr;
        let kind = match flat.kind {
            0 => EventKind::InstructionRange { from, to },
            1 => EventKind::Call { from, to },
            2 => EventKind::Return { from, to },
            3 => EventKind::TraceOn { from },
            4 => EventKind::TraceOff { from },
            5 => EventKind::Exception {
                from,
                number: flat.exception_number,
            },
            6 => EventKind::ExceptionReturn { from },
            code => return Err(UnknownEventKind(code)),
        };
        Ok(Self::new(kind, flat.timestamp, flat.cpu))
    }
}
