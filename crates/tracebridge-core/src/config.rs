//! Session configuration and the static per-architecture decoder payloads.

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Highest trace ID a CoreSight source may use.
pub const MAX_TRACE_ID: u8 = 0x7F;

/// Trace architecture selected by the small integer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ArchVersion {
    /// ETMv3 (selector 3).
    EtmV3,
    /// ETMv4 (selector 4), also used for unknown selectors.
    #[default]
    EtmV4,
    /// Embedded Trace Extension, ARMv9 (selector 5).
    Ete,
}

impl ArchVersion {
    /// Maps a selector to an architecture; unknown values fall back to ETMv4.
    #[must_use]
    pub const fn from_selector(selector: i32) -> Self {
        match selector {
            3 => Self::EtmV3,
            5 => Self::Ete,
            _ => Self::EtmV4,
        }
    }

    /// Canonical selector for this architecture.
    #[must_use]
    pub const fn selector(self) -> i32 {
        match self {
            Self::EtmV3 => 3,
            Self::EtmV4 => 4,
            Self::Ete => 5,
        }
    }

    /// Static decoder payload for this architecture.
    #[must_use]
    pub const fn config(self) -> &'static ArchConfig {
        match self {
            Self::EtmV3 => &ETMV3_CONFIG,
            Self::EtmV4 => &ETMV4_CONFIG,
            Self::Ete => &ETE_CONFIG,
        }
    }
}

/// Built-in protocol decoder the engine should instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    /// ETMv3 instruction decoder.
    EtmV3,
    /// ETMv4 instruction decoder.
    EtmV4I,
    /// ETE decoder.
    Ete,
}

impl DecoderKind {
    /// Registered decoder name in the engine's builtin table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EtmV3 => "ETMV3",
            Self::EtmV4I => "ETMV4I",
            Self::Ete => "ETE",
        }
    }
}

impl std::fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Core architecture version recorded in the decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreArch {
    /// ARMv7.
    V7,
    /// ARMv8.
    V8,
}

/// Core profile recorded in the decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreProfile {
    /// Application profile.
    CortexA,
    /// Real-time profile.
    CortexR,
    /// Microcontroller profile.
    CortexM,
}

/// Register image for an ETMv3 decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtmV3Registers {
    /// ETMIDR value.
    pub reg_idr: u32,
}

/// Register image shared by ETMv4 and ETE decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtmV4Registers {
    /// TRCIDR0 value.
    pub reg_idr0: u32,
    /// TRCIDR1 value.
    pub reg_idr1: u32,
    /// TRCIDR2 value.
    pub reg_idr2: u32,
    /// TRCIDR8 value.
    pub reg_idr8: u32,
    /// TRCCONFIGR value.
    pub reg_configr: u32,
}

/// Register payload, shaped by decoder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterPayload {
    /// ETMv3 registers.
    EtmV3(EtmV3Registers),
    /// ETMv4 or ETE registers.
    EtmV4(EtmV4Registers),
}

/// Fixed decoder configuration for one architecture selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchConfig {
    /// Decoder to instantiate.
    pub decoder: DecoderKind,
    /// Core architecture version.
    pub arch: CoreArch,
    /// Core profile.
    pub profile: CoreProfile,
    /// Register payload.
    pub registers: RegisterPayload,
}

/// Minimal ETMv4.0 register image.
const ETMV4_MINIMAL_REGISTERS: EtmV4Registers = EtmV4Registers {
    reg_idr0: 0x2800_0EA1,
    reg_idr1: 0x4100_F403,
    reg_idr2: 0x0000_0488,
    reg_idr8: 0,
    reg_configr: 0x0000_00C1,
};

/// Payload for selector 3.
pub const ETMV3_CONFIG: ArchConfig = ArchConfig {
    decoder: DecoderKind::EtmV3,
    arch: CoreArch::V7,
    profile: CoreProfile::CortexA,
    registers: RegisterPayload::EtmV3(EtmV3Registers { reg_idr: 0 }),
};

/// Payload for selector 4 and every unknown selector.
pub const ETMV4_CONFIG: ArchConfig = ArchConfig {
    decoder: DecoderKind::EtmV4I,
    arch: CoreArch::V8,
    profile: CoreProfile::CortexA,
    registers: RegisterPayload::EtmV4(ETMV4_MINIMAL_REGISTERS),
};

/// Payload for selector 5. ETE reuses the ETMv4 register layout.
pub const ETE_CONFIG: ArchConfig = ArchConfig {
    decoder: DecoderKind::Ete,
    arch: CoreArch::V8,
    profile: CoreProfile::CortexA,
    registers: RegisterPayload::EtmV4(ETMV4_MINIMAL_REGISTERS),
};

const _: () = assert_payload_table();

const fn assert_payload_table() {
    assert!(
        matches!(ETMV3_CONFIG.registers, RegisterPayload::EtmV3(_)),
        "etmv3 decoder needs an etmv3 register image"
    );
    assert!(
        matches!(ETMV4_CONFIG.registers, RegisterPayload::EtmV4(_)),
        "etmv4 decoder needs an etmv4 register image"
    );
    assert!(
        matches!(ETE_CONFIG.registers, RegisterPayload::EtmV4(_)),
        "ete decoder needs an etmv4 register image"
    );
}

/// Everything the engine needs to build one protocol decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderConfig {
    /// Trace source ID the decoder is bound to.
    pub trace_id: u8,
    /// Static architecture payload.
    pub arch: &'static ArchConfig,
}

/// Immutable configuration of a decode session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Reserved protocol selector; carried but not interpreted.
    pub protocol: i32,
    /// CoreSight trace ID of the source (`0..=0x7F`).
    pub trace_id: u8,
    /// Trace architecture.
    pub arch: ArchVersion,
    /// Initial event queue slot count.
    pub queue_capacity: usize,
    /// Upper bound on event queue growth, unbounded when `None`.
    pub queue_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: 0,
            trace_id: 0,
            arch: ArchVersion::EtmV4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_limit: None,
        }
    }
}

impl SessionConfig {
    /// Builds a configuration from the raw host selectors.
    #[must_use]
    pub fn new(protocol: i32, trace_id: u8, arch_selector: i32) -> Self {
        Self {
            protocol,
            trace_id,
            arch: ArchVersion::from_selector(arch_selector),
            ..Self::default()
        }
    }

    /// Returns `true` when the trace ID is inside the CoreSight range.
    ///
    /// Out-of-range IDs are still handed to the decoder; this only drives a
    /// warning.
    #[must_use]
    pub const fn trace_id_is_valid(&self) -> bool {
        self.trace_id <= MAX_TRACE_ID
    }

    /// Decoder configuration derived from this session configuration.
    #[must_use]
    pub const fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            trace_id: self.trace_id,
            arch: self.arch.config(),
        }
    }
}
