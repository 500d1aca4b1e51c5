//! tun device emulation on top of an event-driven vmnet host service.
//!
//! The host pushes "packets available" events and expects a single-packet
//! read per event. A tun consumer wants a file descriptor it can poll and
//! `recv` from. This crate bridges the two:
//!
//! - [`VmnetDevice::open`] starts an interface and returns a [`DeviceHandle`]
//!   wrapping the readable end of a datagram socket pair
//! - every packet event is drained by a bridge running on the session's
//!   [`SerialQueue`] and forwarded as one datagram
//! - [`VmnetDevice::write`] submits outbound packets straight to the host
//! - [`VmnetDevice::close`] disarms the bridge, stops the interface and
//!   releases the session
//!
//! The host service sits behind [`HostNetwork`]. [`EmulatedHost`] implements
//! it in-process for tests and diagnostics.

pub mod buffer;
pub mod config;
pub mod host;
pub mod queue;
pub mod rendezvous;
pub mod socket;
pub mod status;

mod bridge;
mod device;
mod error;

pub use bridge::{BridgeDrop, BridgeStats};
pub use buffer::PacketBuffer;
pub use config::{InterfaceConfig, OperationMode, DEFAULT_QUEUE_LABEL};
pub use device::{DeviceHandle, LifecycleState, VmnetDevice};
pub use error::DeviceError;
pub use host::emulated::{EmulatedHost, EmulatorSettings, QueueStall};
pub use host::{
    EventCallback, EventKind, HostNetwork, InterfaceEvent, InterfaceParams, StartCompletion,
    StopCompletion,
};
pub use queue::{QueueHandle, SerialQueue};
pub use rendezvous::{rendezvous, Rendezvous, Signal};
pub use socket::{SocketBridge, SocketWriter};
pub use status::{describe_status_code, InterfaceStatus};
