//! Self-test for the vmnet tun adapter, driven against the emulated host.

pub mod config;
pub mod probe;

pub use config::{ConfigError, ProbeConfig};
pub use probe::{probe_payload, run_probe, ExchangeCounts, ProbeReport};
