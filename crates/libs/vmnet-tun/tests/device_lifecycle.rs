use vmnet_tun::{
    DeviceError, EmulatedHost, EmulatorSettings, InterfaceConfig, InterfaceStatus, LifecycleState,
    VmnetDevice,
};

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .is_test(true)
        .try_init();
}

fn device_with(settings: EmulatorSettings) -> (EmulatedHost, VmnetDevice<EmulatedHost>) {
    init_logging();
    let host = EmulatedHost::with_settings(settings);
    let device = VmnetDevice::new(host.clone());
    (host, device)
}

#[test]
fn open_then_close_releases_the_interface() {
    let (host, device) = device_with(EmulatorSettings::default());

    let handle = device.open().expect("open");
    assert_eq!(device.state(), LifecycleState::Running);
    assert_eq!(device.status(), InterfaceStatus::Success);
    assert_eq!(device.max_packet_size(), Some(1514));
    let params = device.interface_params().expect("params while running");
    assert_eq!(params.mtu, Some(1500));
    assert!(host.has_event_callback());
    assert_eq!(host.last_config(), Some(InterfaceConfig::default()));

    device.close(&handle).expect("close");

    assert_eq!(device.state(), LifecycleState::Closed);
    assert_eq!(device.max_packet_size(), None);
    assert!(!host.has_event_callback());
    assert_eq!(host.running_interfaces(), 0);
    assert_eq!(host.stop_calls(), 1);
}

#[test]
fn second_open_is_rejected_and_keeps_the_first_session() {
    let (host, device) = device_with(EmulatorSettings::default());
    let handle = device.open().expect("first open");

    let err = device.open().expect_err("double open");

    assert!(matches!(err, DeviceError::AlreadyOpen { state: LifecycleState::Running }));
    assert_eq!(host.start_calls(), 1);
    assert_eq!(device.state(), LifecycleState::Running);
    assert_eq!(device.write(b"still alive").expect("write on first session"), 11);

    device.close(&handle).expect("close first session");
}

#[test]
fn stale_handle_cannot_close_a_newer_session() {
    let (host, device) = device_with(EmulatorSettings::default());
    let stale = device.open().expect("first open");
    device.close(&stale).expect("first close");
    let current = device.open().expect("second open");
    assert_ne!(stale.session_id(), current.session_id());

    let err = device.close(&stale).expect_err("stale handle");

    assert!(matches!(err, DeviceError::InvalidHandle));
    assert_eq!(err.to_string(), "attempt to close broken vmnet device");
    assert_eq!(host.stop_calls(), 1);
    assert_eq!(device.state(), LifecycleState::Running);

    device.close(&current).expect("close current session");
}

#[test]
fn closing_twice_performs_no_second_stop() {
    let (host, device) = device_with(EmulatorSettings::default());
    let handle = device.open().expect("open");
    device.close(&handle).expect("close");

    assert!(matches!(device.close(&handle), Err(DeviceError::InvalidHandle)));
    assert_eq!(host.stop_calls(), 1);
    assert_eq!(device.state(), LifecycleState::Closed);
}

#[test]
fn failed_start_leaves_device_reopenable() {
    let (host, device) = device_with(EmulatorSettings {
        start_status: InterfaceStatus::GeneralFailure,
        ..EmulatorSettings::default()
    });

    let err = device.open().expect_err("start refused");

    assert!(matches!(err, DeviceError::Setup { status: InterfaceStatus::GeneralFailure }));
    assert_eq!(
        err.to_string(),
        "unable to create vmnet device: general failure (possibly not enough privileges)"
    );
    assert_eq!(device.state(), LifecycleState::Failed);
    assert_eq!(device.status(), InterfaceStatus::GeneralFailure);
    assert_eq!(host.running_interfaces(), 0);

    host.update_settings(|settings| settings.start_status = InterfaceStatus::Success);
    let handle = device.open().expect("retry open");
    assert_eq!(device.state(), LifecycleState::Running);
    assert_eq!(host.start_calls(), 2);

    device.close(&handle).expect("close");
}

#[test]
fn teardown_failure_is_reported_but_resources_are_released() {
    let (host, device) = device_with(EmulatorSettings {
        stop_status: InterfaceStatus::InvalidAccess,
        ..EmulatorSettings::default()
    });
    let first = device.open().expect("open");

    let err = device.close(&first).expect_err("stop completion reports failure");

    assert!(matches!(err, DeviceError::Teardown { status: InterfaceStatus::InvalidAccess }));
    assert_eq!(device.state(), LifecycleState::Failed);
    assert!(!host.has_event_callback());
    assert!(matches!(device.write(b"after"), Err(DeviceError::NotOpen)));

    host.update_settings(|settings| settings.stop_status = InterfaceStatus::Success);
    let second = device.open().expect("reopen after failed teardown");
    device.close(&second).expect("clean close");
    assert_eq!(device.state(), LifecycleState::Closed);
}

#[test]
fn start_without_max_packet_size_stops_the_interface() {
    let (host, device) = device_with(EmulatorSettings {
        omit_max_packet_size: true,
        ..EmulatorSettings::default()
    });

    let err = device.open().expect_err("no usable parameters");

    assert!(matches!(err, DeviceError::InvalidParameters { .. }));
    assert_eq!(device.state(), LifecycleState::Failed);
    assert_eq!(host.stop_calls(), 1);
    assert_eq!(host.running_interfaces(), 0);
}

#[test]
fn refused_event_registration_stops_the_interface() {
    let (host, device) = device_with(EmulatorSettings {
        register_status: InterfaceStatus::InvalidAccess,
        ..EmulatorSettings::default()
    });

    let err = device.open().expect_err("registration refused");

    assert!(matches!(err, DeviceError::Register { status: InterfaceStatus::InvalidAccess }));
    assert_eq!(err.status(), Some(InterfaceStatus::InvalidAccess));
    assert_eq!(host.running_interfaces(), 0);
    assert!(!host.has_event_callback());
}
