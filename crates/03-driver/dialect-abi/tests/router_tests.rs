//! Message router and command table tests.
//! A pair of loopback instances carries real traffic so routing, handler
//! dispatch and deferred replies run through the transport workers.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use dialect_abi::{
    CommandTable, DeferredReply, Dialect, DispatchError, HandlerOutcome, MessageRouter, Outcome,
    Request,
};
use parking_lot::Mutex;
use smallvec::smallvec;
use transport::loopback::LoopbackBus;
use transport::{Eid, MediumAddress, MediumConfig, MediumKind, MsgType};
use transport_fabric::{
    InstanceConfig, InstanceHandle, MsgParams, RxParams, TransportInstance,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every message routed to it.
struct Recorder {
    ty: MsgType,
    seen: Sender<Vec<u8>>,
}

impl Dialect for Recorder {
    fn msg_type(&self) -> MsgType {
        self.ty
    }

    fn name(&self) -> &'static str {
        "recorder"
    }

    fn handle_inbound(&self, _: &InstanceHandle, payload: &[u8], _: RxParams) -> Outcome {
        let _ = self.seen.send(payload.to_vec());
        Outcome::Dropped("recorded")
    }
}

fn recorder(ty: MsgType) -> (Arc<Recorder>, Receiver<Vec<u8>>) {
    let (seen, rx) = crossbeam_channel::unbounded();
    (Arc::new(Recorder { ty, seen }), rx)
}

fn pair(bus: &LoopbackBus) -> (TransportInstance, TransportInstance) {
    let mut a = TransportInstance::new(InstanceConfig::new("a").with_local_eid(Eid(0x0A)))
        .expect("instance");
    a.configure(
        MediumConfig::Smbus { bus: 1, addr: 0x20 },
        Box::new(bus.attach(0x20, MediumKind::Smbus)),
    )
    .expect("configure");
    let mut b = TransportInstance::new(InstanceConfig::new("b").with_local_eid(Eid(0x1D)))
        .expect("instance");
    b.configure(
        MediumConfig::Smbus { bus: 1, addr: 0x40 },
        Box::new(bus.attach(0x40, MediumKind::Smbus)),
    )
    .expect("configure");
    (a, b)
}

/// Routing ignores the integrity-check bit and keeps types apart.
#[test]
fn routes_by_type_ignoring_integrity_bit() {
    init_logs();
    let bus = LoopbackBus::new();
    let (mut a, mut b) = pair(&bus);
    let router = Arc::new(MessageRouter::new());
    let (pldm, pldm_rx) = recorder(MsgType::PLDM);
    let (cci, cci_rx) = recorder(MsgType::CCI);
    router.register(pldm);
    router.register(cci);
    b.set_rx_handler(router.clone());
    a.start().expect("start a");
    b.start().expect("start b");

    let to_b = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));
    a.handle().send(&[0x81, 0x80, 0x00, 0x02], to_b).expect("pldm");
    a.handle().send(&[0x08, 0x00, 0x01], to_b).expect("cci");
    a.handle().send(&[0x7E, 0x00], to_b).expect("vendor");

    let wait = Duration::from_secs(2);
    assert_eq!(pldm_rx.recv_timeout(wait).expect("pldm"), vec![0x81, 0x80, 0x00, 0x02]);
    assert_eq!(cci_rx.recv_timeout(wait).expect("cci"), vec![0x08, 0x00, 0x01]);
    assert!(pldm_rx.recv_timeout(Duration::from_millis(50)).is_err());

    let types: Vec<u8> = router.types().supported().iter().map(|t| t.as_byte()).collect();
    assert_eq!(types, vec![0x01, 0x08]);
}

/// A later registration for the same type replaces the earlier one.
#[test]
fn reregistering_a_type_replaces_the_dialect() {
    let router = MessageRouter::new();
    let (first, _) = recorder(MsgType::NCSI);
    let (second, _) = recorder(MsgType::NCSI);
    router.register(first);
    router.register(second.clone());

    let current = router.dialect(MsgType::NCSI).expect("dialect");
    assert!(std::ptr::eq(
        Arc::as_ptr(&current) as *const u8,
        Arc::as_ptr(&second) as *const u8
    ));
    assert_eq!(router.types().supported().len(), 1);
}

/// Deferred replies carry the captured header and echo the request tag.
#[test]
fn deferred_reply_prepends_header() {
    init_logs();
    let bus = LoopbackBus::new();
    let (mut a, mut b) = pair(&bus);
    let (got_tx, got_rx) = crossbeam_channel::unbounded();
    a.set_rx_handler(Arc::new(
        move |_: &InstanceHandle, payload: &[u8], params: RxParams| {
            let _ = got_tx.send((payload.to_vec(), params));
        },
    ));

    let parked: Arc<Mutex<Option<DeferredReply>>> = Arc::new(Mutex::new(None));
    let table = Arc::new(CommandTable::new());
    let slot = Arc::clone(&parked);
    table.register(
        0x10,
        Arc::new(move |req: &Request<'_>| -> Result<HandlerOutcome, DispatchError> {
            *slot.lock() = Some(req.defer());
            Ok(HandlerOutcome::Later)
        }),
    );
    let handler_table = Arc::clone(&table);
    b.set_rx_handler(Arc::new(
        move |instance: &InstanceHandle, payload: &[u8], params: RxParams| {
            let req = Request::new(
                instance,
                params,
                payload[1],
                payload[2],
                &payload[3..],
                smallvec![payload[0], payload[1] & 0x7F, payload[2]],
            );
            assert_eq!(handler_table.dispatch(&req), Ok(HandlerOutcome::Later));
        },
    ));
    a.start().expect("start a");
    b.start().expect("start b");

    a.handle()
        .send(
            &[0x7E, 0x85, 0x10, 0xAA],
            MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40)),
        )
        .expect("request");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let reply = loop {
        if let Some(reply) = parked.lock().take() {
            break reply;
        }
        assert!(std::time::Instant::now() < deadline, "handler never ran");
        std::thread::sleep(Duration::from_millis(2));
    };
    reply.send(&[0x00, 0x42]).expect("deferred send");

    let (payload, params) = got_rx.recv_timeout(Duration::from_secs(2)).expect("reply");
    assert_eq!(payload, vec![0x7E, 0x05, 0x10, 0x00, 0x42]);
    assert!(!params.tag_owner);
    assert_eq!(params.tag.value(), 0);
}

/// Unknown commands surface as `UnknownCommand` with the code.
#[test]
fn command_table_reports_unknown_commands() {
    let bus = LoopbackBus::new();
    let (a, _b) = pair(&bus);
    let handle = a.handle();
    let table = CommandTable::new();
    table.register(
        0x02,
        Arc::new(|_: &Request<'_>| -> Result<HandlerOutcome, DispatchError> {
            Ok(HandlerOutcome::Reply(vec![0x00]))
        }),
    );

    let params = RxParams {
        src: Eid(0x08),
        tag: transport::MsgTag::new(3),
        tag_owner: true,
        from: MediumAddress::smbus(0x12),
    };
    let known = Request::new(&handle, params, 0, 0x02, &[], smallvec![0x00]);
    let unknown = Request::new(&handle, params, 0, 0x09, &[], smallvec![0x00]);
    assert_eq!(table.dispatch(&known), Ok(HandlerOutcome::Reply(vec![0x00])));
    assert_eq!(table.dispatch(&unknown), Err(DispatchError::UnknownCommand(0x09)));
    assert_eq!(table.commands(), vec![0x02]);
}
