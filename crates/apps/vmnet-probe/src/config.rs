use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use vmnet_tun::EmulatorSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid probe config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid probe config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub max_packet_size: u64,
    pub mtu: u64,
    pub echo: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        let settings = EmulatorSettings::default();
        Self { max_packet_size: settings.max_packet_size, mtu: settings.mtu, echo: true }
    }
}

impl EmulatorConfig {
    pub fn settings(&self) -> EmulatorSettings {
        EmulatorSettings {
            max_packet_size: self.max_packet_size,
            mtu: self.mtu,
            echo: self.echo,
            ..EmulatorSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub packets: u32,
    pub payload_len: usize,
    pub read_timeout_ms: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self { packets: 8, payload_len: 64, read_timeout_ms: 1000 }
    }
}

/// Contents of a probe TOML file. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub log: LogConfig,
    pub emulator: EmulatorConfig,
    pub probe: ProbeSection,
}

impl ProbeConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.packets == 0 {
            return Err(ConfigError::Invalid("probe.packets must be greater than zero".into()));
        }
        if self.emulator.max_packet_size == 0 {
            return Err(ConfigError::Invalid(
                "emulator.max_packet_size must be greater than zero".into(),
            ));
        }
        if self.probe.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe.read_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
