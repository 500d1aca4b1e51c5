use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

const CODE_SUCCESS: u32 = 1000;
const CODE_FAILURE: u32 = 1001;
const CODE_MEM_FAILURE: u32 = 1002;
const CODE_INVALID_ARGUMENT: u32 = 1003;
const CODE_SETUP_INCOMPLETE: u32 = 1004;
const CODE_INVALID_ACCESS: u32 = 1005;
const CODE_PACKET_TOO_BIG: u32 = 1006;
const CODE_BUFFER_EXHAUSTED: u32 = 1007;
const CODE_TOO_MANY_PACKETS: u32 = 1008;
const CODE_SHARING_SERVICE_BUSY: u32 = 1009;

/// Status reported by the host interface service.
///
/// Numeric codes follow the vmnet return values. Codes the adapter does not
/// know about are kept as [`InterfaceStatus::Unknown`] so they still reach the
/// logs unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceStatus {
    Success,
    GeneralFailure,
    MemoryFailure,
    InvalidArgument,
    SetupIncomplete,
    InvalidAccess,
    PacketTooBig,
    BufferExhausted,
    TooManyPackets,
    SharingServiceBusy,
    Unknown(u32),
}

impl InterfaceStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            CODE_SUCCESS => Self::Success,
            CODE_FAILURE => Self::GeneralFailure,
            CODE_MEM_FAILURE => Self::MemoryFailure,
            CODE_INVALID_ARGUMENT => Self::InvalidArgument,
            CODE_SETUP_INCOMPLETE => Self::SetupIncomplete,
            CODE_INVALID_ACCESS => Self::InvalidAccess,
            CODE_PACKET_TOO_BIG => Self::PacketTooBig,
            CODE_BUFFER_EXHAUSTED => Self::BufferExhausted,
            CODE_TOO_MANY_PACKETS => Self::TooManyPackets,
            CODE_SHARING_SERVICE_BUSY => Self::SharingServiceBusy,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Success => CODE_SUCCESS,
            Self::GeneralFailure => CODE_FAILURE,
            Self::MemoryFailure => CODE_MEM_FAILURE,
            Self::InvalidArgument => CODE_INVALID_ARGUMENT,
            Self::SetupIncomplete => CODE_SETUP_INCOMPLETE,
            Self::InvalidAccess => CODE_INVALID_ACCESS,
            Self::PacketTooBig => CODE_PACKET_TOO_BIG,
            Self::BufferExhausted => CODE_BUFFER_EXHAUSTED,
            Self::TooManyPackets => CODE_TOO_MANY_PACKETS,
            Self::SharingServiceBusy => CODE_SHARING_SERVICE_BUSY,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Human readable diagnostic for log lines and error messages.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::GeneralFailure => "general failure (possibly not enough privileges)",
            Self::MemoryFailure => "memory allocation failure",
            Self::InvalidArgument => "invalid argument specified",
            Self::SetupIncomplete => "interface setup is not complete",
            Self::InvalidAccess => "invalid access, permission denied",
            Self::PacketTooBig => "packet size is larger than MTU",
            Self::BufferExhausted => "buffers exhausted in kernel",
            Self::TooManyPackets => "packet count exceeds limit",
            Self::SharingServiceBusy => "conflict, sharing service is in use",
            Self::Unknown(_) => "unknown vmnet error",
        }
    }
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Translate a raw status code straight to its diagnostic string.
pub fn describe_status_code(code: u32) -> &'static str {
    InterfaceStatus::from_code(code).description()
}

/// Last status observed for one interface session.
///
/// Written by start/stop completions on the session queue, read by the event
/// bridge guard.
/// `Unknown` codes carry a tag bit above the 32-bit code, so an unknown
/// status never reads back as a known one.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU64);

const UNKNOWN_TAG: u64 = 1 << 32;

impl StatusCell {
    pub(crate) fn new(status: InterfaceStatus) -> Self {
        Self(AtomicU64::new(Self::encode(status)))
    }

    pub(crate) fn load(&self) -> InterfaceStatus {
        let raw = self.0.load(Ordering::Acquire);
        let code = (raw & u64::from(u32::MAX)) as u32;
        if raw & UNKNOWN_TAG != 0 {
            InterfaceStatus::Unknown(code)
        } else {
            InterfaceStatus::from_code(code)
        }
    }

    pub(crate) fn store(&self, status: InterfaceStatus) {
        self.0.store(Self::encode(status), Ordering::Release);
    }

    fn encode(status: InterfaceStatus) -> u64 {
        match status {
            InterfaceStatus::Unknown(code) => UNKNOWN_TAG | u64::from(code),
            known => u64::from(known.code()),
        }
    }
}
