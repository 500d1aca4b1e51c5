//! Interface lifecycle and the outbound write path.
//!
//! A [`VmnetDevice`] owns at most one running session. `open` starts an
//! interface on the host, wires its packet events to a fresh socket pair and
//! hands the caller the readable end. `close` tears the session down in the
//! reverse order: events first, then the interface, then local resources.

use std::fmt;
use std::io;
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::bridge::{BridgeCounters, BridgeSlot, BridgeStats, EventBridge};
use crate::buffer::PacketBuffer;
use crate::config::InterfaceConfig;
use crate::error::DeviceError;
use crate::host::{EventKind, HostNetwork, InterfaceParams};
use crate::queue::SerialQueue;
use crate::rendezvous::rendezvous;
use crate::socket::SocketBridge;
use crate::status::{InterfaceStatus, StatusCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Closed,
    Failed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Whether `open` may start a new session from this state.
    pub fn accepts_open(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Closed | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readable end of a running session. Each `recv` yields one inbound packet.
#[derive(Debug)]
pub struct DeviceHandle {
    session: u64,
    socket: UnixDatagram,
}

impl DeviceHandle {
    pub fn session_id(&self) -> u64 {
        self.session
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub fn socket(&self) -> &UnixDatagram {
        &self.socket
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for DeviceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

struct Session<H: HostNetwork> {
    id: u64,
    reader_fd: RawFd,
    // Clone of the caller's end, shut down at close so blocked readers see EOF.
    reader: UnixDatagram,
    interface: Arc<H::Interface>,
    status: Arc<StatusCell>,
    max_packet_size: usize,
    params: InterfaceParams,
    bridge: Arc<EventBridge<H>>,
    // Dropped last so pending completions drain before the worker exits.
    queue: SerialQueue,
}

struct Lifecycle<H: HostNetwork> {
    state: LifecycleState,
    last_status: InterfaceStatus,
    session: Option<Arc<Session<H>>>,
}

/// tun-like adapter over a host interface service.
///
/// `open` and `close` block the calling thread until the host completes the
/// request; call them from a plain thread, not from an async runtime worker.
pub struct VmnetDevice<H: HostNetwork> {
    host: Arc<H>,
    config: InterfaceConfig,
    lifecycle: Mutex<Lifecycle<H>>,
    counters: Arc<BridgeCounters>,
    next_session: AtomicU64,
}

impl<H: HostNetwork> fmt::Debug for VmnetDevice<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmnetDevice")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H: HostNetwork> VmnetDevice<H> {
    pub fn new(host: H) -> Self {
        Self {
            host: Arc::new(host),
            config: InterfaceConfig::default(),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Uninitialized,
                last_status: InterfaceStatus::SetupIncomplete,
                session: None,
            }),
            counters: Arc::new(BridgeCounters::default()),
            next_session: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().state
    }

    /// Last status reported by the host for this device.
    pub fn status(&self) -> InterfaceStatus {
        let lifecycle = self.lifecycle();
        match lifecycle.session.as_ref() {
            Some(session) => session.status.load(),
            None => lifecycle.last_status,
        }
    }

    pub fn max_packet_size(&self) -> Option<usize> {
        self.running_session().map(|session| session.max_packet_size)
    }

    pub fn interface_params(&self) -> Option<InterfaceParams> {
        self.running_session().map(|session| session.params.clone())
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    /// Starts the host interface and returns the readable end of a new
    /// session.
    pub fn open(&self) -> Result<DeviceHandle, DeviceError> {
        {
            let mut lifecycle = self.lifecycle();
            if !lifecycle.state.accepts_open() {
                let err = DeviceError::AlreadyOpen { state: lifecycle.state };
                log::error!("vmnet: {}", err);
                return Err(err);
            }
            lifecycle.state = LifecycleState::Starting;
        }

        let started = self.start_session();

        let mut lifecycle = self.lifecycle();
        match started {
            Ok((session, handle)) => {
                log::info!(
                    "vmnet: interface started session={} max_packet_size={} mtu={:?}",
                    session.id,
                    session.max_packet_size,
                    session.params.mtu
                );
                lifecycle.state = LifecycleState::Running;
                lifecycle.last_status = InterfaceStatus::Success;
                lifecycle.session = Some(Arc::new(session));
                Ok(handle)
            }
            Err(err) => {
                log::error!("vmnet: {}", err);
                lifecycle.state = LifecycleState::Failed;
                if let Some(status) = err.status() {
                    lifecycle.last_status = status;
                }
                Err(err)
            }
        }
    }

    fn start_session(&self) -> Result<(Session<H>, DeviceHandle), DeviceError> {
        let (reader, writer) = SocketBridge::new().map_err(DeviceError::Socket)?.into_parts();
        let queue = SerialQueue::new(self.config.queue_label.clone()).map_err(DeviceError::Queue)?;
        let status = Arc::new(StatusCell::new(InterfaceStatus::SetupIncomplete));

        log::debug!(
            "vmnet: starting interface mode={:?} isolation={} pool={}-{}/{}",
            self.config.mode,
            self.config.enable_isolation,
            self.config.start_address,
            self.config.end_address,
            self.config.subnet_mask
        );

        let (signal, started) = rendezvous();
        let completion_status = status.clone();
        let interface = self.host.start_interface(
            &self.config,
            queue.handle(),
            Box::new(move |start_status, params| {
                completion_status.store(start_status);
                signal.signal((start_status, params));
            }),
        );
        let Some((start_status, params)) = started.wait() else {
            if let Some(interface) = interface.as_ref() {
                self.abort_start(interface, &queue, &status);
            }
            return Err(DeviceError::CompletionLost { operation: "start" });
        };
        if !start_status.is_success() {
            if let Some(interface) = interface.as_ref() {
                self.abort_start(interface, &queue, &status);
            }
            return Err(DeviceError::Setup { status: start_status });
        }

        let Some(interface) = interface else {
            return Err(DeviceError::InvalidParameters {
                reason: "host returned no interface".to_string(),
            });
        };
        let interface = Arc::new(interface);
        let params = params.unwrap_or_default();

        let Some(max_packet_size) = params
            .max_packet_size
            .and_then(|max| usize::try_from(max).ok())
            .filter(|max| *max > 0)
        else {
            self.abort_start(&interface, &queue, &status);
            return Err(DeviceError::InvalidParameters {
                reason: "missing max packet size".to_string(),
            });
        };

        let bridge = Arc::new(EventBridge::new(
            self.host.clone(),
            interface.clone(),
            status.clone(),
            BridgeSlot { buffer: PacketBuffer::new(max_packet_size), writer },
            self.counters.clone(),
        ));
        let registered = self.host.set_event_callback(
            &interface,
            EventKind::PacketsAvailable,
            Some((queue.handle(), bridge.callback())),
        );
        if !registered.is_success() {
            bridge.disarm();
            self.abort_start(&interface, &queue, &status);
            return Err(DeviceError::Register { status: registered });
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let session_reader = match reader.try_clone() {
            Ok(session_reader) => session_reader,
            Err(err) => {
                self.host.set_event_callback(&interface, EventKind::PacketsAvailable, None);
                bridge.disarm();
                self.abort_start(&interface, &queue, &status);
                return Err(DeviceError::Socket(err));
            }
        };
        let handle = DeviceHandle { session: id, socket: reader };
        let session = Session {
            id,
            reader_fd: handle.as_raw_fd(),
            reader: session_reader,
            interface,
            status,
            max_packet_size,
            params,
            bridge,
            queue,
        };
        Ok((session, handle))
    }

    /// Stops an interface that started but cannot be used.
    fn abort_start(&self, interface: &H::Interface, queue: &SerialQueue, status: &Arc<StatusCell>) {
        match self.stop_interface(interface, queue, status) {
            Ok(stopped) if stopped.is_success() => {}
            Ok(stopped) => log::warn!("vmnet: unable to stop unusable interface: {}", stopped),
            Err(err) => log::warn!("vmnet: {}", err),
        }
    }

    /// Requests a stop and, when the host accepts the request, waits for its
    /// completion. Returns the final stop status.
    fn stop_interface(
        &self,
        interface: &H::Interface,
        queue: &SerialQueue,
        status: &Arc<StatusCell>,
    ) -> Result<InterfaceStatus, DeviceError> {
        let (signal, stopped) = rendezvous();
        let completion_status = status.clone();
        let requested = self.host.stop_interface(
            interface,
            queue.handle(),
            Box::new(move |stop_status| {
                completion_status.store(stop_status);
                signal.signal(stop_status);
            }),
        );
        if !requested.is_success() {
            status.store(requested);
            return Ok(requested);
        }
        stopped.wait().ok_or(DeviceError::CompletionLost { operation: "stop" })
    }

    /// Tears down the session `handle` belongs to.
    ///
    /// Local resources are released even when the host reports a failure.
    pub fn close(&self, handle: &DeviceHandle) -> Result<(), DeviceError> {
        let session = {
            let mut lifecycle = self.lifecycle();
            let owned = lifecycle.state == LifecycleState::Running
                && lifecycle.session.as_ref().is_some_and(|session| {
                    session.id == handle.session && session.reader_fd == handle.as_raw_fd()
                });
            if !owned {
                log::error!(
                    "vmnet: attempt to close broken vmnet device session={}",
                    handle.session
                );
                return Err(DeviceError::InvalidHandle);
            }
            let Some(session) = lifecycle.session.take() else {
                return Err(DeviceError::InvalidHandle);
            };
            lifecycle.state = LifecycleState::Stopping;
            session
        };

        let result = self.teardown(&session);

        let mut lifecycle = self.lifecycle();
        lifecycle.last_status = session.status.load();
        lifecycle.state = match result {
            Ok(()) => LifecycleState::Closed,
            Err(_) => LifecycleState::Failed,
        };
        drop(lifecycle);
        drop(session);
        result
    }

    fn teardown(&self, session: &Session<H>) -> Result<(), DeviceError> {
        // No packet reaches the caller once the slot is gone, even if an event
        // is already queued.
        let slot = session.bridge.disarm();

        let unregistered =
            self.host.set_event_callback(&session.interface, EventKind::PacketsAvailable, None);
        if !unregistered.is_success() {
            log::warn!("vmnet: unable to unregister packet callback: {}", unregistered);
        }

        let stopped = self.stop_interface(&session.interface, &session.queue, &session.status);

        if let Err(err) = session.reader.shutdown(Shutdown::Both) {
            log::debug!("vmnet: reader shutdown failed session={} err={}", session.id, err);
        }
        drop(slot);

        match stopped {
            Ok(status) if status.is_success() => {
                log::info!("vmnet: interface stopped session={}", session.id);
                Ok(())
            }
            Ok(status) => {
                let err = DeviceError::Teardown { status };
                log::error!("vmnet: {}", err);
                Err(err)
            }
            Err(err) => {
                log::error!("vmnet: {}", err);
                Err(err)
            }
        }
    }

    /// Submits one packet to the host. Returns `packet.len()` when the host
    /// accepted it and `0` when it accepted nothing.
    pub fn write(&self, packet: &[u8]) -> Result<usize, DeviceError> {
        let session = self.running_session().ok_or(DeviceError::NotOpen)?;
        if packet.len() > session.max_packet_size {
            let err = DeviceError::Oversize { len: packet.len(), max: session.max_packet_size };
            log::error!("vmnet: {}", err);
            return Err(err);
        }

        match self.host.write_packet(&session.interface, packet) {
            Ok(0) => Ok(0),
            Ok(_) => Ok(packet.len()),
            Err(status) => {
                let err = DeviceError::Write { status };
                log::error!("vmnet: {}", err);
                Err(err)
            }
        }
    }

    fn running_session(&self) -> Option<Arc<Session<H>>> {
        let lifecycle = self.lifecycle();
        match lifecycle.state {
            LifecycleState::Running => lifecycle.session.clone(),
            _ => None,
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle<H>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: HostNetwork> Drop for VmnetDevice<H> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = lifecycle.session.take() else {
            return;
        };
        lifecycle.state = LifecycleState::Stopping;
        log::debug!("vmnet: closing running session on drop session={}", session.id);

        let result = self.teardown(&session);
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        lifecycle.state = match result {
            Ok(()) => LifecycleState::Closed,
            Err(_) => LifecycleState::Failed,
        };
    }
}
