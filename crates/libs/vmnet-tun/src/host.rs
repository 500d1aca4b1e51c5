//! Boundary to the host networking service.
//!
//! The adapter never talks to a concrete interface API directly. Everything it
//! needs from the host (start, stop, event registration, packet read and
//! write) goes through [`HostNetwork`], mirroring the vmnet call surface:
//! asynchronous start/stop with a completion, an event callback per kind, and
//! synchronous single-packet read/write.

pub mod emulated;

use std::sync::Arc;

use crate::config::InterfaceConfig;
use crate::queue::QueueHandle;
use crate::status::InterfaceStatus;

/// Completion for [`HostNetwork::start_interface`]. Parameters are only
/// meaningful when the status is `Success`.
pub type StartCompletion = Box<dyn FnOnce(InterfaceStatus, Option<InterfaceParams>) + Send>;

/// Completion for [`HostNetwork::stop_interface`].
pub type StopCompletion = Box<dyn FnOnce(InterfaceStatus) + Send>;

pub type EventCallback = Arc<dyn Fn(InterfaceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PacketsAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceEvent {
    pub kind: EventKind,
    /// Host estimate of packets waiting, when it provides one.
    pub estimated_packets: Option<u64>,
}

impl InterfaceEvent {
    pub fn packets_available(estimated_packets: Option<u64>) -> Self {
        Self { kind: EventKind::PacketsAvailable, estimated_packets }
    }
}

/// Values negotiated by the host when an interface starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InterfaceParams {
    pub max_packet_size: Option<u64>,
    pub mtu: Option<u64>,
    pub mac_address: Option<String>,
    pub interface_id: Option<String>,
}

/// Host service able to run one or more virtual interfaces.
///
/// Every completion and event callback must be run through the
/// [`QueueHandle`] passed alongside it, never inline on the calling thread.
pub trait HostNetwork: Send + Sync + 'static {
    type Interface: Send + Sync + 'static;

    /// Starts an interface. `completion` fires exactly once on `queue`, even
    /// when no interface handle is returned.
    fn start_interface(
        &self,
        config: &InterfaceConfig,
        queue: QueueHandle,
        completion: StartCompletion,
    ) -> Option<Self::Interface>;

    /// Requests a stop. When the returned status is `Success`, `completion`
    /// fires exactly once on `queue`; otherwise it may never fire.
    fn stop_interface(
        &self,
        interface: &Self::Interface,
        queue: QueueHandle,
        completion: StopCompletion,
    ) -> InterfaceStatus;

    /// Installs or, with `None`, removes the callback for `kind`. Once removal
    /// returns, the host dispatches no further callbacks for that kind.
    fn set_event_callback(
        &self,
        interface: &Self::Interface,
        kind: EventKind,
        registration: Option<(QueueHandle, EventCallback)>,
    ) -> InterfaceStatus;

    /// Reads at most one packet into `buffer`, returning its length, or
    /// `None` when nothing was pending.
    fn read_packet(
        &self,
        interface: &Self::Interface,
        buffer: &mut [u8],
    ) -> Result<Option<usize>, InterfaceStatus>;

    /// Submits one packet, returning how many packets the host accepted.
    fn write_packet(
        &self,
        interface: &Self::Interface,
        packet: &[u8],
    ) -> Result<usize, InterfaceStatus>;
}
