use std::net::Ipv4Addr;

use serde::Serialize;

pub const DEFAULT_QUEUE_LABEL: &str = "vmnet-tun.if-queue";

const DEFAULT_START_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 255, 2, 77);
const DEFAULT_END_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 255, 2, 255);
const DEFAULT_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Host,
    Shared,
    Bridged,
}

/// Interface description handed to the host service on start.
///
/// The adapter always uses [`InterfaceConfig::default`]: host-only mode with
/// isolation, no MAC allocation and a static address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceConfig {
    pub mode: OperationMode,
    pub enable_isolation: bool,
    pub allocate_mac_address: bool,
    pub start_address: Ipv4Addr,
    pub end_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub queue_label: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Host,
            enable_isolation: true,
            allocate_mac_address: false,
            start_address: DEFAULT_START_ADDRESS,
            end_address: DEFAULT_END_ADDRESS,
            subnet_mask: DEFAULT_SUBNET_MASK,
            queue_label: DEFAULT_QUEUE_LABEL.to_string(),
        }
    }
}

impl InterfaceConfig {
    /// Checks that the address pool is ordered and sits inside one subnet.
    pub fn validate(&self) -> Result<(), String> {
        let start = u32::from(self.start_address);
        let end = u32::from(self.end_address);
        let mask = u32::from(self.subnet_mask);

        if mask.leading_ones() != mask.count_ones() {
            return Err(format!("subnet_mask {} is not contiguous", self.subnet_mask));
        }
        if start > end {
            return Err(format!(
                "start_address {} is above end_address {}",
                self.start_address, self.end_address
            ));
        }
        if start & mask != end & mask {
            return Err(format!(
                "address pool {}-{} spans more than one subnet for mask {}",
                self.start_address, self.end_address, self.subnet_mask
            ));
        }
        Ok(())
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.end_address).saturating_sub(u32::from(self.start_address)).saturating_add(1)
    }
}
