//! Hubs on loopback buses with test timing.

use std::time::{Duration, Instant};

use dialect_cci::CciConfig;
use dialect_control::ControlConfig;
use dialect_ncsi::NcsiConfig;
use dialect_pldm::PldmConfig;
use hub::{DialectConfigs, MctpHub, PlatformConfig, PortConfig, RouteConfig};
use transport::loopback::LoopbackBus;
use transport::{MediumConfig, MediumKind};

pub const TIMEOUT: Duration = Duration::from_millis(150);
const SWEEP: Duration = Duration::from_millis(20);

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fast_dialects() -> DialectConfigs {
    DialectConfigs {
        control: ControlConfig {
            timeout: TIMEOUT,
            sweep_interval: SWEEP,
            ..ControlConfig::default()
        },
        pldm: PldmConfig {
            timeout: TIMEOUT,
            sweep_interval: SWEEP,
            ..PldmConfig::default()
        },
        ncsi: NcsiConfig {
            timeout: TIMEOUT,
            sweep_interval: SWEEP,
            ..NcsiConfig::default()
        },
        cci: CciConfig {
            timeout: TIMEOUT,
            sweep_interval: SWEEP,
            ..CciConfig::default()
        },
    }
}

/// One SMBus port of a hub: name, the loopback bus it sits on, the bus
/// number in the hub's config and its own address.
pub struct PortSpec<'a> {
    pub name: &'a str,
    pub bus: &'a LoopbackBus,
    pub bus_no: u8,
    pub addr: u8,
}

/// Builds and starts a hub. `routes` are `(eid, bus_no, addr)`.
pub fn hub(local_eid: u8, ports: &[PortSpec<'_>], routes: &[(u8, u8, u8)]) -> MctpHub {
    hub_with(local_eid, ports, routes, |config| config)
}

pub fn hub_with(
    local_eid: u8,
    ports: &[PortSpec<'_>],
    routes: &[(u8, u8, u8)],
    tweak: impl FnOnce(PlatformConfig) -> PlatformConfig,
) -> MctpHub {
    init_logs();
    let config = tweak(PlatformConfig {
        local_eid,
        ports: ports
            .iter()
            .map(|p| PortConfig {
                name: p.name.to_owned(),
                medium: MediumConfig::Smbus {
                    bus: p.bus_no,
                    addr: p.addr,
                },
            })
            .collect(),
        routes: routes
            .iter()
            .map(|&(eid, bus, addr)| RouteConfig { eid, bus, addr })
            .collect(),
        ..PlatformConfig::default()
    });
    let mut builder = MctpHub::builder().config(config).dialects(fast_dialects());
    for p in ports {
        builder = builder.medium(p.name, Box::new(p.bus.attach(p.addr, MediumKind::Smbus)));
    }
    builder.build().expect("hub")
}

pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
