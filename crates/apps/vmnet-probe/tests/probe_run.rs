use std::io::Write;

use vmnet_probe::{run_probe, ConfigError, ProbeConfig};
use vmnet_tun::LifecycleState;

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .is_test(true)
        .try_init();
}

#[test]
fn config_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    let contents = r#"
[log]
level = "debug"

[emulator]
max_packet_size = 2048

[probe]
packets = 4
payload_len = 512
"#;
    file.write_all(contents.as_bytes()).expect("write config");

    let config = ProbeConfig::from_path(file.path()).expect("load config");

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.emulator.max_packet_size, 2048);
    assert_eq!(config.emulator.mtu, 1500);
    assert_eq!(config.probe.packets, 4);
    assert_eq!(config.probe.payload_len, 512);
}

#[test]
fn missing_config_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    let err = ProbeConfig::from_path(&path).expect_err("missing file");

    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let err = ProbeConfig::from_toml("[probe]\npackets = \"many\"\n").expect_err("bad type");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn echo_probe_is_healthy() {
    init_logging();
    let mut config = ProbeConfig::default();
    config.probe.packets = 16;
    config.probe.payload_len = 1514;

    let report = run_probe(&config).expect("probe run");

    assert!(report.is_healthy(), "{report}");
    assert_eq!(report.packets.sent, 16);
    assert_eq!(report.packets.received, 16);
    assert!(report.oversize_rejected);
    assert_eq!(report.bridge.forwarded, 16);
    assert_eq!(report.final_state, LifecycleState::Closed);
    assert_eq!(report.pool_addresses, 179);
    assert!(report.to_string().contains("(179 addresses)"), "{report}");
}

#[test]
fn probe_without_echo_reports_loss() {
    init_logging();
    let mut config = ProbeConfig::default();
    config.emulator.echo = false;
    config.probe.packets = 2;
    config.probe.read_timeout_ms = 20;

    let report = run_probe(&config).expect("probe run");

    assert!(!report.is_healthy());
    assert_eq!(report.packets.lost, 2);
    assert_eq!(report.final_state, LifecycleState::Closed);
}

#[test]
fn payload_larger_than_max_packet_size_is_rejected() {
    init_logging();
    let mut config = ProbeConfig::default();
    config.probe.payload_len = 4096;

    let err = run_probe(&config).expect_err("payload too large");

    assert!(err.to_string().contains("payload length 4096"), "{err:#}");
}

#[test]
fn report_serializes_to_json() {
    init_logging();
    let mut config = ProbeConfig::default();
    config.probe.packets = 1;

    let report = run_probe(&config).expect("probe run");
    let json = serde_json::to_value(&report).expect("report json");

    assert_eq!(json["final_state"], "closed");
    assert_eq!(json["config"]["mode"], "host");
    assert_eq!(json["packets"]["received"], 1);
    assert_eq!(json["pool_addresses"], 179);
}
