//! Hub assembly tests: builder validation, port wiring and route lookup.

use hub::{MctpHub, PlatformConfig, PortConfig, RouteConfig};
use transport::loopback::LoopbackBus;
use transport::{Eid, MediumConfig, MediumKind, MsgType};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn platform() -> PlatformConfig {
    PlatformConfig {
        local_eid: 0x08,
        ports: vec![
            PortConfig {
                name: "smbus1".into(),
                medium: MediumConfig::Smbus { bus: 1, addr: 0x20 },
            },
            PortConfig {
                name: "smbus2".into(),
                medium: MediumConfig::Smbus { bus: 2, addr: 0x20 },
            },
        ],
        routes: vec![RouteConfig {
            eid: 0x30,
            bus: 2,
            addr: 0x70,
        }],
        ..PlatformConfig::default()
    }
}

/// Every port runs with the configured EID and routes resolve to the
/// port on their bus.
#[test]
fn builds_ports_and_routes() {
    init_logs();
    let bus1 = LoopbackBus::new();
    let bus2 = LoopbackBus::new();
    let hub = MctpHub::builder()
        .config(platform())
        .medium("smbus1", Box::new(bus1.attach(0x20, MediumKind::Smbus)))
        .medium("smbus2", Box::new(bus2.attach(0x20, MediumKind::Smbus)))
        .build()
        .expect("hub");

    let port = hub.port("smbus2").expect("port");
    assert!(port.is_running());
    assert_eq!(port.local_eid(), Eid(0x08));
    assert_eq!(hub.ports().count(), 2);
    assert!(hub.port("smbus9").is_none());

    let route = hub.route(Eid(0x30)).expect("route");
    assert_eq!(route.instance, port);
    assert_eq!(route.to.addr, 0x70);
    assert!(hub.route(Eid(0x31)).is_err());
}

/// All four dialects are registered with the router.
#[test]
fn registers_every_dialect() {
    init_logs();
    let bus = LoopbackBus::new();
    let mut config = platform();
    config.ports.truncate(1);
    config.routes.clear();
    let hub = MctpHub::builder()
        .config(config)
        .medium("smbus1", Box::new(bus.attach(0x20, MediumKind::Smbus)))
        .build()
        .expect("hub");
    let types = hub.router().types().supported();
    for ty in [MsgType::CONTROL, MsgType::PLDM, MsgType::NCSI, MsgType::CCI] {
        assert!(types.contains(&ty), "{ty:?} missing");
    }
}

/// A port without a medium fails the build.
#[test]
fn missing_medium_is_an_error() {
    init_logs();
    let bus = LoopbackBus::new();
    let err = MctpHub::builder()
        .config(platform())
        .medium("smbus1", Box::new(bus.attach(0x20, MediumKind::Smbus)))
        .build()
        .err()
        .expect("build must fail");
    assert!(err.to_string().contains("smbus2"), "{err:#}");
}

/// Building without a config fails.
#[test]
fn missing_config_is_an_error() {
    assert!(MctpHub::builder().build().is_err());
}

/// Shutdown stops the ports; calling it again is harmless.
#[test]
fn shutdown_stops_ports() {
    init_logs();
    let bus = LoopbackBus::new();
    let mut config = platform();
    config.ports.truncate(1);
    config.routes.clear();
    let mut hub = MctpHub::builder()
        .config(config)
        .medium("smbus1", Box::new(bus.attach(0x20, MediumKind::Smbus)))
        .build()
        .expect("hub");
    let port = hub.port("smbus1").expect("port");
    hub.shutdown();
    assert!(!port.is_running());
    hub.shutdown();
}
