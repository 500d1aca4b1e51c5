//! In-process host service.
//!
//! [`EmulatedHost`] behaves like the vmnet service closely enough to drive the
//! adapter end to end: asynchronous start/stop on the caller's queue,
//! packet-availability events, single-packet reads and writes. Inbound traffic
//! comes from [`EmulatedHost::inject_packet`] or, in echo mode, from the
//! adapter's own writes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::InterfaceConfig;
use crate::host::{
    EventCallback, EventKind, HostNetwork, InterfaceEvent, InterfaceParams, StartCompletion,
    StopCompletion,
};
use crate::queue::QueueHandle;
use crate::rendezvous::{rendezvous, Signal};
use crate::status::InterfaceStatus;

pub const DEFAULT_MAX_PACKET_SIZE: u64 = 1514;
pub const DEFAULT_MTU: u64 = 1500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorSettings {
    pub max_packet_size: u64,
    pub mtu: u64,
    /// Status delivered by the start completion.
    pub start_status: InterfaceStatus,
    /// Status returned synchronously by a stop request.
    pub stop_request_status: InterfaceStatus,
    /// Status delivered by the stop completion.
    pub stop_status: InterfaceStatus,
    pub register_status: InterfaceStatus,
    /// When set, every read fails with this status.
    pub read_failure: Option<InterfaceStatus>,
    /// When set, every in-limit write fails with this status.
    pub write_failure: Option<InterfaceStatus>,
    /// Packet count reported for an in-limit write. Zero means the host took
    /// nothing and the packet is neither recorded nor echoed.
    pub write_accepts: usize,
    /// Leave `max_packet_size` out of the start parameters.
    pub omit_max_packet_size: bool,
    /// Loop every accepted write back as an inbound packet.
    pub echo: bool,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            mtu: DEFAULT_MTU,
            start_status: InterfaceStatus::Success,
            stop_request_status: InterfaceStatus::Success,
            stop_status: InterfaceStatus::Success,
            register_status: InterfaceStatus::Success,
            read_failure: None,
            write_failure: None,
            write_accepts: 1,
            omit_max_packet_size: false,
            echo: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmulatedInterface {
    id: u64,
}

impl EmulatedInterface {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct InterfaceState {
    inbound: VecDeque<Vec<u8>>,
    registration: Option<(QueueHandle, EventCallback)>,
}

impl InterfaceState {
    fn raise_packets_available(&self) -> bool {
        let Some((queue, callback)) = self.registration.as_ref() else {
            return false;
        };
        let callback = callback.clone();
        let estimated = self.inbound.len() as u64;
        queue.dispatch(move || callback(InterfaceEvent::packets_available(Some(estimated))))
    }
}

#[derive(Default)]
struct EmulatorState {
    next_id: u64,
    interfaces: HashMap<u64, InterfaceState>,
    written: Vec<Vec<u8>>,
    last_config: Option<InterfaceConfig>,
}

#[derive(Default)]
struct EmulatorCounters {
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

#[derive(Default)]
struct EmulatedInner {
    settings: Mutex<EmulatorSettings>,
    state: Mutex<EmulatorState>,
    counters: EmulatorCounters,
}

/// Cloneable handle to one emulated host; clones share all state.
#[derive(Clone, Default)]
pub struct EmulatedHost {
    inner: Arc<EmulatedInner>,
}

/// Holds every registered interface queue blocked until dropped.
#[must_use = "queues resume as soon as the stall is dropped"]
pub struct QueueStall {
    releases: Vec<Signal<()>>,
}

impl QueueStall {
    pub fn stalled_queues(&self) -> usize {
        self.releases.len()
    }

    pub fn release(self) {}
}

impl Drop for QueueStall {
    fn drop(&mut self) {
        for release in self.releases.drain(..) {
            release.signal(());
        }
    }
}

impl EmulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: EmulatorSettings) -> Self {
        let host = Self::default();
        *host.settings_guard() = settings;
        host
    }

    pub fn settings(&self) -> EmulatorSettings {
        self.settings_guard().clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut EmulatorSettings)) {
        update(&mut self.settings_guard());
    }

    /// Queues `packet` as inbound traffic on every running interface and
    /// raises a packet-availability event for each. Returns how many
    /// interfaces received it.
    pub fn inject_packet(&self, packet: &[u8]) -> usize {
        let mut state = self.state_guard();
        let mut delivered = 0;
        for iface in state.interfaces.values_mut() {
            iface.inbound.push_back(packet.to_vec());
            iface.raise_packets_available();
            delivered += 1;
        }
        delivered
    }

    /// Raises a packet-availability event without queueing anything.
    pub fn notify_packets_available(&self) -> usize {
        let state = self.state_guard();
        state.interfaces.values().filter(|iface| iface.raise_packets_available()).count()
    }

    /// Blocks the queue of every interface with an event registration until
    /// the returned guard is dropped. Work dispatched meanwhile waits behind it.
    pub fn stall_queues(&self) -> QueueStall {
        let state = self.state_guard();
        let mut releases = Vec::new();
        for (queue, _) in state.interfaces.values().filter_map(|iface| iface.registration.as_ref())
        {
            let (release, released) = rendezvous::<()>();
            if queue.dispatch(move || {
                let _ = released.wait();
            }) {
                releases.push(release);
            }
        }
        QueueStall { releases }
    }

    pub fn start_calls(&self) -> usize {
        self.inner.counters.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.counters.stop_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.inner.counters.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.inner.counters.write_calls.load(Ordering::SeqCst)
    }

    /// Every packet the host accepted from the adapter, in order.
    pub fn written_packets(&self) -> Vec<Vec<u8>> {
        self.state_guard().written.clone()
    }

    pub fn last_config(&self) -> Option<InterfaceConfig> {
        self.state_guard().last_config.clone()
    }

    pub fn running_interfaces(&self) -> usize {
        self.state_guard().interfaces.len()
    }

    pub fn has_event_callback(&self) -> bool {
        self.state_guard().interfaces.values().any(|iface| iface.registration.is_some())
    }

    pub fn pending_inbound(&self) -> usize {
        self.state_guard().interfaces.values().map(|iface| iface.inbound.len()).sum()
    }

    fn settings_guard(&self) -> MutexGuard<'_, EmulatorSettings> {
        self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_guard(&self) -> MutexGuard<'_, EmulatorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mac_address_for(id: u64) -> String {
    format!("02:76:6d:00:{:02x}:{:02x}", (id >> 8) & 0xff, id & 0xff)
}

impl HostNetwork for EmulatedHost {
    type Interface = EmulatedInterface;

    fn start_interface(
        &self,
        config: &InterfaceConfig,
        queue: QueueHandle,
        completion: StartCompletion,
    ) -> Option<EmulatedInterface> {
        self.inner.counters.start_calls.fetch_add(1, Ordering::SeqCst);
        let settings = self.settings();

        let mut status = settings.start_status;
        if status.is_success() {
            if let Err(err) = config.validate() {
                log::debug!("emulated host: rejecting interface config err={}", err);
                status = InterfaceStatus::InvalidArgument;
            }
        }

        let mut state = self.state_guard();
        state.last_config = Some(config.clone());
        state.next_id += 1;
        let id = state.next_id;

        let params = status.is_success().then(|| InterfaceParams {
            max_packet_size: (!settings.omit_max_packet_size).then_some(settings.max_packet_size),
            mtu: Some(settings.mtu),
            mac_address: Some(mac_address_for(id)),
            interface_id: Some(format!("emu{id}")),
        });
        if status.is_success() {
            let iface = InterfaceState { inbound: VecDeque::new(), registration: None };
            state.interfaces.insert(id, iface);
        }
        drop(state);

        queue.dispatch(move || completion(status, params));
        status.is_success().then_some(EmulatedInterface { id })
    }

    fn stop_interface(
        &self,
        interface: &EmulatedInterface,
        queue: QueueHandle,
        completion: StopCompletion,
    ) -> InterfaceStatus {
        self.inner.counters.stop_calls.fetch_add(1, Ordering::SeqCst);
        let settings = self.settings();
        if !settings.stop_request_status.is_success() {
            return settings.stop_request_status;
        }

        if self.state_guard().interfaces.remove(&interface.id).is_none() {
            return InterfaceStatus::InvalidArgument;
        }

        let status = settings.stop_status;
        queue.dispatch(move || completion(status));
        InterfaceStatus::Success
    }

    fn set_event_callback(
        &self,
        interface: &EmulatedInterface,
        kind: EventKind,
        registration: Option<(QueueHandle, EventCallback)>,
    ) -> InterfaceStatus {
        let register_status = self.settings().register_status;
        let mut state = self.state_guard();
        let Some(iface) = state.interfaces.get_mut(&interface.id) else {
            return InterfaceStatus::InvalidArgument;
        };

        match kind {
            EventKind::PacketsAvailable => {
                if registration.is_some() && !register_status.is_success() {
                    return register_status;
                }
                iface.registration = registration;
            }
        }
        InterfaceStatus::Success
    }

    fn read_packet(
        &self,
        interface: &EmulatedInterface,
        buffer: &mut [u8],
    ) -> Result<Option<usize>, InterfaceStatus> {
        self.inner.counters.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.settings().read_failure {
            return Err(status);
        }

        let mut state = self.state_guard();
        let iface =
            state.interfaces.get_mut(&interface.id).ok_or(InterfaceStatus::InvalidArgument)?;
        let Some(packet) = iface.inbound.pop_front() else {
            return Ok(None);
        };
        if packet.len() > buffer.len() {
            return Err(InterfaceStatus::PacketTooBig);
        }

        buffer[..packet.len()].copy_from_slice(&packet);
        Ok(Some(packet.len()))
    }

    fn write_packet(
        &self,
        interface: &EmulatedInterface,
        packet: &[u8],
    ) -> Result<usize, InterfaceStatus> {
        self.inner.counters.write_calls.fetch_add(1, Ordering::SeqCst);
        let settings = self.settings();
        if packet.len() as u64 > settings.max_packet_size {
            return Err(InterfaceStatus::PacketTooBig);
        }
        if let Some(status) = settings.write_failure {
            return Err(status);
        }

        let mut guard = self.state_guard();
        let state = &mut *guard;
        let iface =
            state.interfaces.get_mut(&interface.id).ok_or(InterfaceStatus::InvalidArgument)?;
        if settings.write_accepts == 0 {
            return Ok(0);
        }
        state.written.push(packet.to_vec());
        if settings.echo {
            iface.inbound.push_back(packet.to_vec());
            iface.raise_packets_available();
        }
        Ok(settings.write_accepts)
    }
}

#[cfg(test)]
mod tests {
    use super::{EmulatedHost, EmulatorSettings, DEFAULT_MAX_PACKET_SIZE};
    use crate::config::InterfaceConfig;
    use crate::host::{EventKind, HostNetwork, InterfaceEvent, InterfaceParams};
    use crate::queue::SerialQueue;
    use crate::rendezvous::rendezvous;
    use crate::status::InterfaceStatus;
    use std::net::Ipv4Addr;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn start(
        host: &EmulatedHost,
        queue: &SerialQueue,
    ) -> (Option<super::EmulatedInterface>, InterfaceStatus, Option<InterfaceParams>) {
        let (signal, started) = rendezvous();
        let iface = host.start_interface(
            &InterfaceConfig::default(),
            queue.handle(),
            Box::new(move |status, params| signal.signal((status, params))),
        );
        let (status, params) = started.wait().expect("start completion");
        (iface, status, params)
    }

    #[test]
    fn start_reports_negotiated_parameters() {
        let host = EmulatedHost::new();
        let queue = SerialQueue::new("emu.start").expect("queue");

        let (iface, status, params) = start(&host, &queue);

        assert!(iface.is_some());
        assert_eq!(status, InterfaceStatus::Success);
        let params = params.expect("params on success");
        assert_eq!(params.max_packet_size, Some(DEFAULT_MAX_PACKET_SIZE));
        assert_eq!(params.mtu, Some(1500));
        assert!(params.mac_address.expect("mac").starts_with("02:"));
        assert_eq!(host.start_calls(), 1);
        assert_eq!(host.last_config(), Some(InterfaceConfig::default()));
    }

    #[test]
    fn failed_start_delivers_status_without_parameters() {
        let host = EmulatedHost::with_settings(EmulatorSettings {
            start_status: InterfaceStatus::GeneralFailure,
            ..EmulatorSettings::default()
        });
        let queue = SerialQueue::new("emu.start-fail").expect("queue");

        let (iface, status, params) = start(&host, &queue);

        assert!(iface.is_none());
        assert_eq!(status, InterfaceStatus::GeneralFailure);
        assert!(params.is_none());
        assert_eq!(host.running_interfaces(), 0);
    }

    #[test]
    fn invalid_address_pool_is_rejected() {
        let host = EmulatedHost::new();
        let queue = SerialQueue::new("emu.bad-config").expect("queue");
        let config = InterfaceConfig {
            start_address: Ipv4Addr::new(10, 255, 2, 254),
            end_address: Ipv4Addr::new(10, 255, 2, 1),
            ..InterfaceConfig::default()
        };

        let (signal, started) = rendezvous();
        let iface = host.start_interface(
            &config,
            queue.handle(),
            Box::new(move |status, _| signal.signal(status)),
        );

        assert!(iface.is_none());
        assert_eq!(started.wait(), Some(InterfaceStatus::InvalidArgument));
    }

    #[test]
    fn echo_write_raises_event_and_is_readable() {
        let host = EmulatedHost::with_settings(EmulatorSettings {
            echo: true,
            ..EmulatorSettings::default()
        });
        let queue = SerialQueue::new("emu.echo").expect("queue");
        let (iface, _, _) = start(&host, &queue);
        let iface = iface.expect("interface");

        let (events_tx, events_rx) = std_mpsc::channel();
        let status = host.set_event_callback(
            &iface,
            EventKind::PacketsAvailable,
            Some((
                queue.handle(),
                Arc::new(move |event: InterfaceEvent| {
                    let _ = events_tx.send(event);
                }),
            )),
        );
        assert_eq!(status, InterfaceStatus::Success);
        assert!(host.has_event_callback());

        assert_eq!(host.write_packet(&iface, b"ping"), Ok(1));
        let event = events_rx.recv_timeout(Duration::from_secs(1)).expect("event");
        assert_eq!(event, InterfaceEvent::packets_available(Some(1)));

        let mut buf = [0_u8; 16];
        assert_eq!(host.read_packet(&iface, &mut buf), Ok(Some(4)));
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(host.read_packet(&iface, &mut buf), Ok(None));
        assert_eq!(host.written_packets(), vec![b"ping".to_vec()]);
    }

    #[test]
    fn oversize_write_and_short_buffer_read_fail() {
        let host = EmulatedHost::with_settings(EmulatorSettings {
            max_packet_size: 8,
            ..EmulatorSettings::default()
        });
        let queue = SerialQueue::new("emu.limits").expect("queue");
        let iface = start(&host, &queue).0.expect("interface");

        assert_eq!(host.write_packet(&iface, &[0_u8; 9]), Err(InterfaceStatus::PacketTooBig));
        assert_eq!(host.inject_packet(&[1_u8; 6]), 1);

        let mut small = [0_u8; 4];
        assert_eq!(host.read_packet(&iface, &mut small), Err(InterfaceStatus::PacketTooBig));
        assert_eq!(host.pending_inbound(), 0);
    }

    #[test]
    fn stop_clears_registration_and_completes_on_queue() {
        let host = EmulatedHost::new();
        let queue = SerialQueue::new("emu.stop").expect("queue");
        let iface = start(&host, &queue).0.expect("interface");
        host.set_event_callback(
            &iface,
            EventKind::PacketsAvailable,
            Some((queue.handle(), Arc::new(|_| {}))),
        );

        let (signal, stopped) = rendezvous();
        let status = host.stop_interface(
            &iface,
            queue.handle(),
            Box::new(move |status| signal.signal(status)),
        );

        assert_eq!(status, InterfaceStatus::Success);
        assert_eq!(stopped.wait(), Some(InterfaceStatus::Success));
        assert!(!host.has_event_callback());
        assert_eq!(host.running_interfaces(), 0);

        let again = host.stop_interface(&iface, queue.handle(), Box::new(|_| {}));
        assert_eq!(again, InterfaceStatus::InvalidArgument);
        assert_eq!(host.stop_calls(), 2);
    }

    #[test]
    fn stall_holds_queue_until_released() {
        let host = EmulatedHost::new();
        let queue = SerialQueue::new("emu.stall").expect("queue");
        let iface = start(&host, &queue).0.expect("interface");
        host.set_event_callback(
            &iface,
            EventKind::PacketsAvailable,
            Some((queue.handle(), Arc::new(|_| {}))),
        );

        let stall = host.stall_queues();
        assert_eq!(stall.stalled_queues(), 1);

        let (ran_tx, ran_rx) = std_mpsc::channel();
        queue.dispatch(move || {
            let _ = ran_tx.send(());
        });
        assert!(ran_rx.recv_timeout(Duration::from_millis(50)).is_err());

        stall.release();
        ran_rx.recv_timeout(Duration::from_secs(1)).expect("queue resumes after release");
    }
}
