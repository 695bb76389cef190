//! Two hubs on one loopback bus talking control and PLDM.
//! The requester sits at 0x20 with EID 0x08; the responder at 0x22 keeps
//! the default EID 0x0A.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dialect_abi::{DialectError, DispatchError, HandlerOutcome, Request};
use dialect_pldm::{base_cmd, cc, pldm_type};
use hub::MctpHub;
use transport::loopback::LoopbackBus;
use transport::{Eid, MsgType};
use transport_fabric::RouteEntry;

use crate::harness::{hub_with, wait_for, PortSpec, TIMEOUT};

const REQUESTER: u8 = 0x20;
const RESPONDER: u8 = 0x22;

fn pair_with(max_packet_payload: usize) -> (LoopbackBus, MctpHub, MctpHub) {
    let bus = LoopbackBus::new();
    let requester = hub_with(
        0x08,
        &[PortSpec {
            name: "smbus1",
            bus: &bus,
            bus_no: 1,
            addr: REQUESTER,
        }],
        &[(0x0A, 1, RESPONDER), (0x60, 1, 0x60)],
        |mut config| {
            config.max_packet_payload = max_packet_payload;
            config
        },
    );
    let responder = hub_with(
        Eid::DEFAULT.0,
        &[PortSpec {
            name: "smbus1",
            bus: &bus,
            bus_no: 1,
            addr: RESPONDER,
        }],
        &[(0x08, 1, REQUESTER)],
        |mut config| {
            config.max_packet_payload = max_packet_payload;
            config
        },
    );
    (bus, requester, responder)
}

fn pair() -> (LoopbackBus, MctpHub, MctpHub) {
    pair_with(transport::DEFAULT_MAX_PACKET_PAYLOAD)
}

/// Get Endpoint ID against a freshly started responder reports 0x0A.
#[test]
fn get_endpoint_id_reports_default() {
    let (_bus, requester, _responder) = pair();
    let route = requester.route(Eid(0x0A)).expect("route");
    let id = requester.control().get_endpoint_id(&route).expect("endpoint id");
    assert_eq!(id.eid, Eid(0x0A));
}

/// Set Endpoint ID moves the responder; the new EID answers once routed.
#[test]
fn set_endpoint_id_moves_the_responder() {
    let (_bus, requester, responder) = pair();
    let route = requester.route(Eid(0x0A)).expect("route");
    let assignment = requester
        .control()
        .set_endpoint_id(&route, Eid(0x0B))
        .expect("set eid");
    assert_eq!(assignment.eid, Eid(0x0B));
    let port = responder.port("smbus1").expect("port");
    assert!(wait_for(|| port.local_eid() == Eid(0x0B)));

    requester
        .routes()
        .add_route(RouteEntry {
            eid: Eid(0x0B),
            bus: 1,
            addr: RESPONDER,
        })
        .expect("route");
    let route = requester.route(Eid(0x0B)).expect("route");
    let id = requester.control().get_endpoint_id(&route).expect("endpoint id");
    assert_eq!(id.eid, Eid(0x0B));
}

/// Message type support lists every dialect the responder registered.
#[test]
fn message_types_cover_all_dialects() {
    let (_bus, requester, _responder) = pair();
    let route = requester.route(Eid(0x0A)).expect("route");
    let types = requester
        .control()
        .message_type_support(&route)
        .expect("types");
    for ty in [MsgType::CONTROL, MsgType::PLDM, MsgType::NCSI, MsgType::CCI] {
        assert!(types.contains(&ty), "{ty:?} missing from {types:?}");
    }
}

/// A 37-byte command bitmap response crosses the wire as three 16-byte
/// packets and reassembles intact.
#[test]
fn multi_packet_response_reassembles() {
    let (bus, requester, _responder) = pair_with(16);
    let route = requester.route(Eid(0x0A)).expect("route");
    let bitmap = requester
        .pldm()
        .get_commands(&route, pldm_type::BASE)
        .expect("commands");
    assert_eq!(bitmap[0], 0x34);
    assert!(bitmap[1..].iter().all(|&b| b == 0));
    let response_packets = bus
        .history()
        .iter()
        .filter(|r| r.from == RESPONDER && r.to == REQUESTER)
        .count();
    assert_eq!(response_packets, 3);
}

/// A handler that defers answers later from another thread.
#[test]
fn deferred_pldm_response() {
    let (_bus, requester, responder) = pair();
    responder.pldm().commands(pldm_type::PLATFORM).register(
        0x11,
        Arc::new(|req: &Request<'_>| -> Result<HandlerOutcome, DispatchError> {
            let reply = req.defer();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                let _ = reply.send(&[cc::SUCCESS, 0x99]);
            });
            Ok(HandlerOutcome::Later)
        }),
    );
    let route = requester.route(Eid(0x0A)).expect("route");
    let data = requester
        .pldm()
        .read(&route, pldm_type::PLATFORM, 0x11, &[])
        .expect("deferred read");
    assert_eq!(data, vec![0x99]);
}

/// Unknown commands come back as a one-byte unsupported completion.
#[test]
fn unsupported_pldm_command() {
    let (_bus, requester, _responder) = pair();
    let route = requester.route(Eid(0x0A)).expect("route");
    match requester.pldm().read(&route, pldm_type::BASE, 0x7F, &[]) {
        Err(DialectError::Completion { code }) => {
            assert_eq!(code, u16::from(cc::UNSUPPORTED_CMD))
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// A silent endpoint costs exactly three requests on the wire.
#[test]
fn retry_bound_against_silent_endpoint() {
    let (bus, requester, _responder) = pair();
    let _silent = bus.attach(0x60, transport::MediumKind::Smbus);
    let route = requester.route(Eid(0x60)).expect("route");
    let started = Instant::now();
    match requester
        .pldm()
        .read(&route, pldm_type::BASE, base_cmd::GET_TID, &[])
    {
        Err(DialectError::ReadTimeout { attempts }) => assert_eq!(attempts, 3),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(started.elapsed() >= TIMEOUT * 3);
    let sent = bus.history().iter().filter(|r| r.to == 0x60).count();
    assert_eq!(sent, 3);
    let port = requester.port("smbus1").expect("port");
    assert!(wait_for(|| port.ids().pldm.in_use() == 0));
}

/// Shutdown cancels what is pending, returns its instance ids and
/// refuses new requests.
#[test]
fn shutdown_cancels_pending_requests() {
    let (bus, mut requester, _responder) = pair();
    let _silent = bus.attach(0x60, transport::MediumKind::Smbus);
    let route = requester.route(Eid(0x60)).expect("route");
    let port = requester.port("smbus1").expect("port");
    let handle = requester
        .pldm()
        .send(&route, pldm_type::BASE, base_cmd::GET_TID, &[], |_| {}, || {})
        .expect("send");
    assert_eq!(port.ids().pldm.in_use(), 1);

    requester.shutdown();
    assert!(!handle.is_pending());
    assert_eq!(port.ids().pldm.in_use(), 0);
    match requester
        .pldm()
        .send(&route, pldm_type::BASE, base_cmd::GET_TID, &[], |_| {}, || {})
    {
        Err(DialectError::Correlation(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(port.ids().pldm.in_use(), 0);
}
