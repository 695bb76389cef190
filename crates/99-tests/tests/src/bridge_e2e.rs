//! Bridging between two buses through a hub with two ports.
//!
//! ```text
//! host 0x08 @0x20 ──bus A── 0x22 bridge 0x0A 0x24 ──bus B── 0x70 @ device 0x30
//! ```

use dialect_abi::DialectError;
use hub::MctpHub;
use transport::loopback::LoopbackBus;
use transport::Eid;

use crate::harness::{hub, wait_for, PortSpec};

struct Topology {
    bus_a: LoopbackBus,
    bus_b: LoopbackBus,
    host: MctpHub,
    bridge: MctpHub,
    _device: MctpHub,
}

fn topology() -> Topology {
    let bus_a = LoopbackBus::new();
    let bus_b = LoopbackBus::new();
    let host = hub(
        0x08,
        &[PortSpec {
            name: "a",
            bus: &bus_a,
            bus_no: 1,
            addr: 0x20,
        }],
        &[(0x0A, 1, 0x22), (0x30, 1, 0x22), (0x40, 1, 0x22)],
    );
    let bridge = hub(
        0x0A,
        &[
            PortSpec {
                name: "left",
                bus: &bus_a,
                bus_no: 1,
                addr: 0x22,
            },
            PortSpec {
                name: "right",
                bus: &bus_b,
                bus_no: 2,
                addr: 0x24,
            },
        ],
        &[(0x08, 1, 0x20), (0x30, 2, 0x70)],
    );
    let device = hub(
        0x30,
        &[PortSpec {
            name: "b",
            bus: &bus_b,
            bus_no: 1,
            addr: 0x70,
        }],
        &[(0x08, 1, 0x24)],
    );
    Topology {
        bus_a,
        bus_b,
        host,
        bridge,
        _device: device,
    }
}

/// A request for the far endpoint crosses the bridge byte for byte and the
/// answer comes back the same way.
#[test]
fn bridged_request_is_forwarded_unchanged() {
    let topo = topology();
    let route = topo.host.route(Eid(0x30)).expect("route");
    let id = topo.host.control().get_endpoint_id(&route).expect("endpoint id");
    assert_eq!(id.eid, Eid(0x30));

    let inbound: Vec<_> = topo
        .bus_a
        .history()
        .into_iter()
        .filter(|r| r.from == 0x20 && r.to == 0x22)
        .map(|r| r.bytes)
        .collect();
    let forwarded: Vec<_> = topo
        .bus_b
        .history()
        .into_iter()
        .filter(|r| r.from == 0x24 && r.to == 0x70)
        .map(|r| r.bytes)
        .collect();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound, forwarded);

    let right = topo.bridge.port("right").expect("port");
    let left = topo.bridge.port("left").expect("port");
    assert!(wait_for(|| right.metrics().bridged == 1 && left.metrics().bridged == 1));
}

/// The bridge answers for its own EID instead of forwarding.
#[test]
fn bridge_answers_for_itself() {
    let topo = topology();
    let route = topo.host.route(Eid(0x0A)).expect("route");
    let id = topo.host.control().get_endpoint_id(&route).expect("endpoint id");
    assert_eq!(id.eid, Eid(0x0A));
    assert!(topo.bus_b.history().is_empty());
}

/// Packets for an EID the bridge cannot route are dropped there.
#[test]
fn unroutable_destination_is_dropped_at_the_bridge() {
    let topo = topology();
    let route = topo.host.route(Eid(0x40)).expect("route");
    match topo.host.control().get_endpoint_id(&route) {
        Err(DialectError::ReadTimeout { attempts }) => assert_eq!(attempts, 1),
        other => panic!("unexpected result: {other:?}"),
    }
    let left = topo.bridge.port("left").expect("port");
    assert!(left.metrics().anomalies >= 1);
    assert!(topo.bus_b.history().is_empty());
}
