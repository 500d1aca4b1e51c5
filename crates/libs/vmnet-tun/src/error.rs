use std::io;

use crate::device::LifecycleState;
use crate::status::InterfaceStatus;

/// Errors surfaced by [`crate::VmnetDevice`] operations.
///
/// None of them are retried internally; the caller decides whether to call
/// `open` again.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("unable to create read socket: {0}")]
    Socket(#[source] io::Error),

    #[error("unable to create interface queue: {0}")]
    Queue(#[source] io::Error),

    #[error("unable to create vmnet device: {status}")]
    Setup { status: InterfaceStatus },

    #[error("vmnet device started without usable parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("unable to register packet callback: {status}")]
    Register { status: InterfaceStatus },

    #[error("host service dropped the {operation} completion")]
    CompletionLost { operation: &'static str },

    #[error("unable to properly close vmnet device: {status}")]
    Teardown { status: InterfaceStatus },

    #[error("attempt to close broken vmnet device")]
    InvalidHandle,

    #[error("vmnet device is already {state}")]
    AlreadyOpen { state: LifecycleState },

    #[error("vmnet device is not open")]
    NotOpen,

    #[error("max packet size ({max}) exceeded: {len}")]
    Oversize { len: usize, max: usize },

    #[error("write failed: {status}")]
    Write { status: InterfaceStatus },
}

impl DeviceError {
    /// Host status carried by the error, when the host produced one.
    pub fn status(&self) -> Option<InterfaceStatus> {
        match self {
            Self::Setup { status }
            | Self::Register { status }
            | Self::Teardown { status }
            | Self::Write { status } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for errors raised before the host service was involved.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Socket(_)
                | Self::Queue(_)
                | Self::InvalidHandle
                | Self::AlreadyOpen { .. }
                | Self::NotOpen
                | Self::Oversize { .. }
        )
    }
}
