use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::buffer::PacketBuffer;
use crate::host::{EventCallback, EventKind, HostNetwork, InterfaceEvent};
use crate::socket::SocketWriter;
use crate::status::{InterfaceStatus, StatusCell};

/// Reason an inbound packet was dropped by the bridge. Logged and counted,
/// never returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum BridgeDrop {
    #[error("unable to read packet: {0}")]
    Read(InterfaceStatus),

    #[error("unable to write to read socket: {0}")]
    Forward(#[source] io::Error),

    #[error("unable to write to read socket: short write {written} of {len} bytes")]
    ShortForward { written: usize, len: usize },
}

/// Cumulative inbound path counters for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub forwarded: u64,
    pub empty_reads: u64,
    pub read_drops: u64,
    pub forward_drops: u64,
    pub ignored: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BridgeCounters {
    forwarded: AtomicU64,
    empty_reads: AtomicU64,
    read_drops: AtomicU64,
    forward_drops: AtomicU64,
    ignored: AtomicU64,
}

impl BridgeCounters {
    pub(crate) fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
            read_drops: self.read_drops.load(Ordering::Relaxed),
            forward_drops: self.forward_drops.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Resources the bridge needs to move one packet: the shared receive buffer
/// and the internal socket end.
#[derive(Debug)]
pub(crate) struct BridgeSlot {
    pub(crate) buffer: PacketBuffer,
    pub(crate) writer: SocketWriter,
}

/// Packet-availability handler: pulls one packet from the host interface and
/// forwards it to the caller's socket.
pub(crate) struct EventBridge<H: HostNetwork> {
    host: Arc<H>,
    interface: Arc<H::Interface>,
    status: Arc<StatusCell>,
    slot: Mutex<Option<BridgeSlot>>,
    counters: Arc<BridgeCounters>,
}

impl<H: HostNetwork> EventBridge<H> {
    pub(crate) fn new(
        host: Arc<H>,
        interface: Arc<H::Interface>,
        status: Arc<StatusCell>,
        slot: BridgeSlot,
        counters: Arc<BridgeCounters>,
    ) -> Self {
        Self { host, interface, status, slot: Mutex::new(Some(slot)), counters }
    }

    /// Callback handed to the host. Holds the bridge weakly so a registration
    /// the host forgets to drop cannot keep the session alive.
    pub(crate) fn callback(self: &Arc<Self>) -> EventCallback {
        let bridge = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_event(event);
            }
        })
    }

    pub(crate) fn on_event(&self, event: InterfaceEvent) {
        if event.kind != EventKind::PacketsAvailable {
            return;
        }
        if !self.status.load().is_success() {
            BridgeCounters::bump(&self.counters.ignored);
            return;
        }

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slot.as_mut() else {
            BridgeCounters::bump(&self.counters.ignored);
            return;
        };

        match self.pump(slot) {
            Ok(Some(len)) => {
                BridgeCounters::bump(&self.counters.forwarded);
                log::trace!("vmnet: forwarded packet len={}", len);
            }
            Ok(None) => BridgeCounters::bump(&self.counters.empty_reads),
            Err(reason @ BridgeDrop::Read(_)) => {
                BridgeCounters::bump(&self.counters.read_drops);
                log::error!("vmnet: {}", reason);
            }
            Err(reason) => {
                BridgeCounters::bump(&self.counters.forward_drops);
                log::error!("vmnet: {}", reason);
            }
        }
    }

    fn pump(&self, slot: &mut BridgeSlot) -> Result<Option<usize>, BridgeDrop> {
        let Some(len) = self
            .host
            .read_packet(&self.interface, slot.buffer.as_mut_slice())
            .map_err(BridgeDrop::Read)?
        else {
            return Ok(None);
        };

        let packet = slot.buffer.packet(len);
        let written = slot.writer.forward(packet).map_err(BridgeDrop::Forward)?;
        if written != packet.len() {
            return Err(BridgeDrop::ShortForward { written, len: packet.len() });
        }
        Ok(Some(packet.len()))
    }

    /// Takes buffer and writer out of the bridge. Waits for an in-flight
    /// event to finish; every later event is ignored.
    pub(crate) fn disarm(&self) -> Option<BridgeSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
