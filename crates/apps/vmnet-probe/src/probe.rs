use std::fmt;
use std::io;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Serialize;
use vmnet_tun::{
    BridgeStats, DeviceError, DeviceHandle, EmulatedHost, InterfaceConfig, InterfaceParams,
    LifecycleState, VmnetDevice,
};

use crate::config::{ProbeConfig, ProbeSection};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeCounts {
    pub sent: u32,
    pub received: u32,
    pub lost: u32,
    pub corrupted: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub config: InterfaceConfig,
    pub pool_addresses: u32,
    pub interface: InterfaceParams,
    pub max_packet_size: usize,
    pub payload_len: usize,
    pub packets: ExchangeCounts,
    pub oversize_rejected: bool,
    pub bridge: BridgeStats,
    pub final_state: LifecycleState,
}

impl ProbeReport {
    pub fn is_healthy(&self) -> bool {
        self.packets.lost == 0
            && self.packets.corrupted == 0
            && self.packets.received == self.packets.sent
            && self.oversize_rejected
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "interface:   {}", self.interface.interface_id.as_deref().unwrap_or("-"))?;
        writeln!(f, "mac address: {}", self.interface.mac_address.as_deref().unwrap_or("-"))?;
        writeln!(
            f,
            "pool:        {}-{}/{} ({} addresses)",
            self.config.start_address,
            self.config.end_address,
            self.config.subnet_mask,
            self.pool_addresses
        )?;
        writeln!(f, "max packet:  {} bytes", self.max_packet_size)?;
        writeln!(
            f,
            "packets:     sent={} received={} lost={} corrupted={} (payload {} bytes)",
            self.packets.sent,
            self.packets.received,
            self.packets.lost,
            self.packets.corrupted,
            self.payload_len
        )?;
        let oversize = if self.oversize_rejected { "rejected" } else { "ACCEPTED" };
        writeln!(f, "oversize:    {}", oversize)?;
        writeln!(
            f,
            "bridge:      forwarded={} empty={} read_drops={} forward_drops={} ignored={}",
            self.bridge.forwarded,
            self.bridge.empty_reads,
            self.bridge.read_drops,
            self.bridge.forward_drops,
            self.bridge.ignored
        )?;
        writeln!(f, "state:       {}", self.final_state)?;
        write!(f, "result:      {}", if self.is_healthy() { "ok" } else { "FAILED" })
    }
}

/// Payload for probe packet `seq`. Distinct sequences produce distinct bytes
/// so a reordered or stale echo counts as corrupted.
pub fn probe_payload(seq: u32, len: usize) -> Vec<u8> {
    let seed = seq.to_be_bytes();
    (0..len).map(|i| seed[i % 4] ^ (i as u8).wrapping_mul(31)).collect()
}

/// Opens a device over an emulated host, exchanges the configured packets,
/// checks the oversize guard and closes the device again.
pub fn run_probe(config: &ProbeConfig) -> Result<ProbeReport> {
    let device = VmnetDevice::new(EmulatedHost::with_settings(config.emulator.settings()));
    let handle = device.open().context("unable to open vmnet device")?;
    let interface = device.interface_params().unwrap_or_default();
    let max_packet_size = device.max_packet_size().unwrap_or_default();
    log::info!(
        "probe: device open session={} max_packet_size={}",
        handle.session_id(),
        max_packet_size
    );

    let exchanged = exchange(&device, &handle, &config.probe, max_packet_size);
    let closed = device.close(&handle);
    let (packets, oversize_rejected) = exchanged?;
    closed.context("unable to close vmnet device")?;

    Ok(ProbeReport {
        config: device.config().clone(),
        pool_addresses: device.config().pool_size(),
        interface,
        max_packet_size,
        payload_len: config.probe.payload_len,
        packets,
        oversize_rejected,
        bridge: device.bridge_stats(),
        final_state: device.state(),
    })
}

fn exchange(
    device: &VmnetDevice<EmulatedHost>,
    handle: &DeviceHandle,
    probe: &ProbeSection,
    max_packet_size: usize,
) -> Result<(ExchangeCounts, bool)> {
    ensure!(
        (1..=max_packet_size).contains(&probe.payload_len),
        "payload length {} outside 1..={}",
        probe.payload_len,
        max_packet_size
    );
    handle
        .set_read_timeout(Some(Duration::from_millis(probe.read_timeout_ms)))
        .context("unable to set read timeout")?;

    let mut counts = ExchangeCounts::default();
    let mut buf = vec![0_u8; max_packet_size];
    for seq in 0..probe.packets {
        let payload = probe_payload(seq, probe.payload_len);
        let written = device.write(&payload).with_context(|| format!("write of packet {seq}"))?;
        if written != payload.len() {
            log::warn!("probe: host accepted no packet seq={}", seq);
            counts.lost += 1;
            continue;
        }
        counts.sent += 1;

        match handle.recv(&mut buf) {
            Ok(n) if buf[..n] == payload[..] => counts.received += 1,
            Ok(n) => {
                log::warn!("probe: corrupted echo seq={} len={}", seq, n);
                counts.corrupted += 1;
            }
            Err(err) if is_timeout(&err) => {
                log::warn!("probe: no echo seq={}", seq);
                counts.lost += 1;
            }
            Err(err) => return Err(err).context("unable to read from device handle"),
        }
    }

    let oversize = vec![0_u8; max_packet_size + 1];
    let oversize_rejected = matches!(device.write(&oversize), Err(DeviceError::Oversize { .. }));
    Ok((counts, oversize_rejected))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
