//! Transport instance integration tests.
//! Real inbound and outbound workers run against the in-memory loopback
//! bus: delivery, tag handling, bridging between instances, write failures,
//! backpressure and lifecycle rules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use transport::loopback::{LoopbackBus, WireRecord};
use transport::{
    Eid, FramingError, Medium, MediumAddress, MediumConfig, MediumKind, RxFrame, TransportError,
    TransportHeader, TransportResult,
};
use transport_fabric::{
    InstanceConfig, InstanceHandle, InstanceState, MsgParams, RouteEntry, RouteTable, RxParams,
    TransportInstance, TX_QUEUE_DEPTH,
};

type Inbox = Receiver<(Vec<u8>, RxParams)>;

fn smbus(bus: u8, addr: u8) -> MediumConfig {
    MediumConfig::Smbus { bus, addr }
}

fn instance_on(bus: &LoopbackBus, name: &str, eid: u8, bus_no: u8, addr: u8) -> TransportInstance {
    let mut instance = TransportInstance::new(InstanceConfig::new(name).with_local_eid(Eid(eid)))
        .expect("instance");
    instance
        .configure(
            smbus(bus_no, addr),
            Box::new(bus.attach(addr, MediumKind::Smbus)),
        )
        .expect("configure");
    instance
}

/// Installs a handler that forwards every delivered message to a channel.
fn collect(instance: &TransportInstance) -> Inbox {
    let (tx, rx): (Sender<(Vec<u8>, RxParams)>, Inbox) = crossbeam_channel::unbounded();
    instance.set_rx_handler(Arc::new(
        move |_: &InstanceHandle, payload: &[u8], params: RxParams| {
            let _ = tx.send((payload.to_vec(), params));
        },
    ));
    rx
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn flags_of(record: &WireRecord) -> TransportHeader {
    TransportHeader::decode(&record.bytes).expect("header")
}

/// A 300-byte request crosses the bus as five packets and is delivered whole,
/// with the sender's EID, tag-owner flag and medium address.
#[test]
fn multi_packet_request_is_delivered_whole() {
    let bus = LoopbackBus::new();
    let mut host = instance_on(&bus, "host", 0x0A, 1, 0x20);
    let mut dev = instance_on(&bus, "dev", 0x1D, 1, 0x40);
    let inbox = collect(&dev);
    host.start().expect("start host");
    dev.start().expect("start dev");

    let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
    host.handle()
        .send(&payload, MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40)))
        .expect("send");

    let (got, params) = inbox.recv_timeout(Duration::from_secs(2)).expect("delivery");
    assert_eq!(got, payload);
    assert_eq!(params.src, Eid(0x0A));
    assert!(params.is_request());
    assert_eq!(params.from, MediumAddress::smbus(0x20));

    let sent: Vec<WireRecord> = bus.history().into_iter().filter(|r| r.from == 0x20).collect();
    assert_eq!(sent.len(), 5);
    assert!(flags_of(&sent[0]).som);
    assert!(flags_of(&sent[4]).eom);
}

/// Replies built from `RxParams::reply` echo the request's tag and clear the
/// tag-owner bit.
#[test]
fn reply_echoes_request_tag() {
    let bus = LoopbackBus::new();
    let mut host = instance_on(&bus, "host", 0x0A, 1, 0x20);
    let mut dev = instance_on(&bus, "dev", 0x1D, 1, 0x40);
    let host_inbox = collect(&host);
    dev.set_rx_handler(Arc::new(
        |instance: &InstanceHandle, payload: &[u8], params: RxParams| {
            let mut reply = payload.to_vec();
            reply.push(0xEE);
            instance.send(&reply, params.reply()).expect("reply");
        },
    ));
    host.start().expect("start host");
    dev.start().expect("start dev");

    let to_dev = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));
    host.handle().send(&[0x7F, 1], to_dev).expect("first");
    host.handle().send(&[0x7F, 2], to_dev).expect("second");

    let (first, p1) = host_inbox.recv_timeout(Duration::from_secs(2)).expect("reply 1");
    let (second, p2) = host_inbox.recv_timeout(Duration::from_secs(2)).expect("reply 2");
    assert_eq!(first, vec![0x7F, 1, 0xEE]);
    assert_eq!(second, vec![0x7F, 2, 0xEE]);
    assert!(!p1.tag_owner && !p2.tag_owner);
    assert_eq!(p1.tag.value(), 0);
    assert_eq!(p2.tag.value(), 1);
    assert_eq!(p1.src, Eid(0x1D));
}

/// Request tags come from the sending instance's counter and wrap at eight.
#[test]
fn request_tags_advance_and_wrap() {
    let bus = LoopbackBus::new();
    let mut host = instance_on(&bus, "host", 0x0A, 1, 0x20);
    let _sink = bus.attach(0x40, MediumKind::Smbus);
    host.start().expect("start");

    let to = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));
    for _ in 0..9 {
        host.handle().send(&[0x00, 0x80, 0x02], to).expect("send");
    }
    let tags: Vec<u8> = bus.history().iter().map(|r| flags_of(r).tag.value()).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4, 5, 6, 7, 0]);
}

/// A packet for a non-local EID leaves through the port its route names,
/// byte for byte, and is never reassembled locally.
#[test]
fn bridged_packet_is_forwarded_unchanged() {
    let upstream = LoopbackBus::new();
    let downstream = LoopbackBus::new();
    let mut up = instance_on(&upstream, "up", 0x0A, 1, 0x10);
    let mut down = TransportInstance::new(InstanceConfig::new("down").with_local_eid(Eid(0x0A)))
        .expect("instance");
    down.configure(
        MediumConfig::I3cController { bus: 2, addr: 0x30 },
        Box::new(downstream.attach(0x30, MediumKind::I3cController)),
    )
    .expect("configure");
    let _device = downstream.attach(0x50, MediumKind::I3cTarget);

    let routes = Arc::new(RouteTable::new());
    routes.add_port(up.handle()).expect("port up");
    routes.add_port(down.handle()).expect("port down");
    routes
        .add_route(RouteEntry {
            eid: Eid(0x33),
            bus: 2,
            addr: 0x50,
        })
        .expect("route");
    up.set_resolver(routes.clone());
    let local = collect(&up);
    up.start().expect("start up");
    down.start().expect("start down");

    let raw = vec![0x01, 0x33, 0x08, 0xC8, 0x01, 0x00, 0x80, 0x02];
    upstream.inject(0x20, 0x10, raw.clone());

    assert!(wait_for(|| !downstream.history().is_empty()));
    assert_eq!(
        downstream.history(),
        vec![WireRecord {
            from: 0x30,
            to: 0x50,
            bytes: raw
        }]
    );
    assert_eq!(down.handle().metrics().bridged, 1);
    assert!(local.try_recv().is_err());
}

/// Without a route the bridged packet is dropped and counted.
#[test]
fn unroutable_packet_is_dropped() {
    let bus = LoopbackBus::new();
    let mut inst = instance_on(&bus, "solo", 0x0A, 1, 0x10);
    inst.set_resolver(Arc::new(RouteTable::new()));
    inst.start().expect("start");

    bus.inject(0x20, 0x10, vec![0x01, 0x44, 0x08, 0xC8, 0x00]);
    let handle = inst.handle();
    assert!(wait_for(|| handle.metrics().anomalies == 1));
}

/// Messages for the null EID are accepted as local.
#[test]
fn null_destination_is_local() {
    let bus = LoopbackBus::new();
    let mut inst = instance_on(&bus, "dev", 0x1D, 1, 0x40);
    let inbox = collect(&inst);
    inst.start().expect("start");

    bus.inject(0x20, 0x40, vec![0x01, 0x00, 0x08, 0xC8, 0x00, 0x80, 0x02]);
    let (payload, params) = inbox.recv_timeout(Duration::from_secs(2)).expect("delivery");
    assert_eq!(payload, vec![0x00, 0x80, 0x02]);
    assert_eq!(params.src, Eid(0x08));
}

/// The first failed packet write aborts the message and reaches the sender.
#[test]
fn write_failure_is_reported_to_sender() {
    let bus = LoopbackBus::new();
    let mut host = instance_on(&bus, "host", 0x0A, 1, 0x20);
    let _dev = bus.attach(0x40, MediumKind::Smbus);
    host.start().expect("start");

    bus.fail_writes(0x20, true);
    let err = host
        .handle()
        .send(&[0u8; 200], MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40)))
        .expect_err("write fails");
    assert!(matches!(err, TransportError::MediumIo(_)));
    assert_eq!(host.handle().metrics().write_failures, 1);
    assert!(bus.history().is_empty());
}

/// Changing the local EID changes the source of later packets.
#[test]
fn local_eid_change_applies_to_later_packets() {
    let bus = LoopbackBus::new();
    let mut host = instance_on(&bus, "host", 0x0A, 1, 0x20);
    let _dev = bus.attach(0x40, MediumKind::Smbus);
    host.start().expect("start");

    let to = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));
    host.handle().send(&[0x00], to).expect("send");
    host.handle().set_local_eid(Eid(0x42));
    host.handle().send(&[0x00], to).expect("send");

    let srcs: Vec<Eid> = bus.history().iter().map(|r| flags_of(r).src).collect();
    assert_eq!(srcs, vec![Eid(0x0A), Eid(0x42)]);
}

/// Medium whose writes announce themselves, then park until the gate is
/// opened.
struct GatedMedium {
    entered: Sender<()>,
    gate: Receiver<()>,
}

impl Medium for GatedMedium {
    fn kind(&self) -> MediumKind {
        MediumKind::Smbus
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        Ok(None)
    }

    fn write(&mut self, _packet: &[u8], _to: MediumAddress) -> TransportResult<()> {
        let _ = self.entered.try_send(());
        let _ = self.gate.recv();
        Ok(())
    }
}

/// A full outbound queue fails fast with `QueueFull`; queued senders
/// complete once the medium drains.
#[test]
fn full_queue_fails_fast() {
    let (open, gate) = crossbeam_channel::bounded::<()>(0);
    let (entered, in_write) = crossbeam_channel::bounded::<()>(1);
    let mut inst = TransportInstance::new(InstanceConfig::new("gated")).expect("instance");
    inst.configure(smbus(1, 0x20), Box::new(GatedMedium { entered, gate }))
        .expect("configure");
    inst.start().expect("start");
    let handle = inst.handle();
    let to = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));

    let spawn_sender = || {
        let handle = handle.clone();
        thread::spawn(move || handle.send(&[0x00], to))
    };

    // One message parked in the worker plus a full queue.
    let mut senders = vec![spawn_sender()];
    in_write
        .recv_timeout(Duration::from_secs(2))
        .expect("worker in write");
    senders.extend((0..TX_QUEUE_DEPTH).map(|_| spawn_sender()));
    assert!(wait_for(|| handle.metrics().accepted as usize == TX_QUEUE_DEPTH + 1));

    assert_eq!(handle.send(&[0x00], to), Err(TransportError::QueueFull));
    assert_eq!(handle.metrics().would_block, 1);

    drop(open);
    for sender in senders {
        assert_eq!(sender.join().expect("join"), Ok(()));
    }
}

/// Lifecycle rules: configure before start, one start at a time, no
/// reconfiguration while running, no sends after stop.
#[test]
fn lifecycle_transitions_are_enforced() {
    let bus = LoopbackBus::new();
    let mut inst = TransportInstance::new(InstanceConfig::new("life")).expect("instance");
    assert_eq!(inst.start(), Err(TransportError::NoMedium));

    let mismatched = inst.configure(
        MediumConfig::I3cTarget { bus: 1, addr: 0x08 },
        Box::new(bus.attach(0x08, MediumKind::Smbus)),
    );
    assert!(matches!(mismatched, Err(TransportError::InvalidConfig(_))));
    assert_eq!(inst.state(), InstanceState::Unconfigured);

    inst.configure(smbus(1, 0x20), Box::new(bus.attach(0x20, MediumKind::Smbus)))
        .expect("configure");
    inst.start().expect("start");
    assert_eq!(inst.start(), Err(TransportError::AlreadyRunning));
    assert_eq!(
        inst.configure(smbus(1, 0x22), Box::new(bus.attach(0x22, MediumKind::Smbus))),
        Err(TransportError::AlreadyRunning)
    );

    let handle = inst.handle();
    inst.stop();
    assert_eq!(inst.state(), InstanceState::Stopped);
    assert_eq!(
        handle.send(&[0x00], MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40))),
        Err(TransportError::NotRunning)
    );

    inst.start().expect("restart");
    assert!(handle.is_running());
}

/// Empty and oversized payloads never reach the queue.
#[test]
fn payload_size_is_checked_before_queueing() {
    let bus = LoopbackBus::new();
    let mut inst = instance_on(&bus, "host", 0x0A, 1, 0x20);
    inst.start().expect("start");
    let to = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));

    assert_eq!(
        inst.handle().send(&[], to),
        Err(TransportError::Framing(FramingError::Empty))
    );
    assert!(matches!(
        inst.handle().send(&[0u8; 1025], to),
        Err(TransportError::Framing(FramingError::Oversize { .. }))
    ));
    assert_eq!(inst.handle().metrics().accepted, 0);
}

/// Panics once on the first read after being armed.
struct FaultyMedium {
    armed: Arc<AtomicBool>,
}

impl Medium for FaultyMedium {
    fn kind(&self) -> MediumKind {
        MediumKind::Smbus
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("driver fault");
        }
        Ok(None)
    }

    fn write(&mut self, _packet: &[u8], _to: MediumAddress) -> TransportResult<()> {
        Ok(())
    }
}

/// A dead worker takes the instance out of `Running`; sends fail until a
/// restart brings fresh workers up.
#[test]
fn worker_panic_fails_the_instance() {
    let armed = Arc::new(AtomicBool::new(false));
    let mut inst = TransportInstance::new(InstanceConfig::new("faulty")).expect("instance");
    inst.configure(
        smbus(1, 0x20),
        Box::new(FaultyMedium {
            armed: Arc::clone(&armed),
        }),
    )
    .expect("configure");
    inst.start().expect("start");
    let handle = inst.handle();
    let to = MsgParams::request(Eid(0x1D), MediumAddress::smbus(0x40));
    assert_eq!(handle.send(&[0x00], to), Ok(()));

    armed.store(true, Ordering::SeqCst);
    assert!(wait_for(|| inst.state() == InstanceState::Failed));
    assert!(!handle.is_running());
    assert_eq!(handle.send(&[0x00], to), Err(TransportError::NotRunning));

    inst.start().expect("restart");
    assert_eq!(inst.state(), InstanceState::Running);
    assert_eq!(handle.send(&[0x00], to), Ok(()));
}
