//! Transport instances: one medium binding with its inbound and outbound
//! workers.
//!
//! The owning [`TransportInstance`] drives the lifecycle
//! (`Unconfigured -> Configured -> Running -> Stopped`). A worker panic moves
//! a running instance to `Failed`; `stop` or `start` recovers from there. Everything else
//! talks to the instance through a cloneable [`InstanceHandle`], which is
//! what resolvers and receive handlers hold on to.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use transport::{
    fragment, Eid, FramingError, Medium, MediumAddress, MediumConfig, MsgTag, Packet,
    Reassembler, RxFrame, TransportError, TransportHeader, TransportResult, ASSEMBLY_LIMIT,
    DEFAULT_MAX_PACKET_PAYLOAD, TAG_MASK,
};

use crate::ids::DialectIds;
use crate::port::{
    make_port_pair, Dequeue, OutboundPort, OutboundQueue, PortMetrics, PortMetricsSnapshot,
    TxKind, TxRequest,
};
use crate::resolver::EndpointResolver;
use crate::runtime::{Tick, WorkerLoop, WorkerSet};
use crate::service::{MsgParams, RxHandler, RxParams, SubmitOutcome};

/// Outbound queue depth per instance.
pub const TX_QUEUE_DEPTH: usize = 16;
/// Inbound poll interval while the medium is idle.
pub const RX_IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Longest the outbound worker waits before re-checking its stop flag.
const TX_IDLE_WAIT: Duration = Duration::from_millis(10);

type SharedMedium = Arc<Mutex<Box<dyn Medium>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Used in worker thread names (`mctp-rx-<name>`, `mctp-tx-<name>`).
    pub name: String,
    pub local_eid: Eid,
    pub max_packet_payload: usize,
    pub queue_depth: usize,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_eid: Eid::DEFAULT,
            max_packet_payload: DEFAULT_MAX_PACKET_PAYLOAD,
            queue_depth: TX_QUEUE_DEPTH,
        }
    }

    pub fn with_local_eid(mut self, eid: Eid) -> Self {
        self.local_eid = eid;
        self
    }

    pub fn with_max_packet_payload(mut self, max: usize) -> Self {
        self.max_packet_payload = max;
        self
    }

    fn validate(&self) -> TransportResult<()> {
        if self.max_packet_payload == 0 {
            return Err(TransportError::InvalidConfig(
                "max packet payload must be non-zero",
            ));
        }
        if self.queue_depth == 0 {
            return Err(TransportError::InvalidConfig("queue depth must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
    /// A worker panicked. Sends fail with [`TransportError::NotRunning`].
    Failed,
}

/// Process-unique identity of an instance, usable in correlation keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

struct Inner {
    name: String,
    local_eid: AtomicU8,
    max_packet_payload: usize,
    queue_depth: usize,
    medium_config: RwLock<Option<MediumConfig>>,
    medium: Mutex<Option<SharedMedium>>,
    resolver: RwLock<Option<Arc<dyn EndpointResolver>>>,
    rx_handler: RwLock<Option<Arc<dyn RxHandler>>>,
    port: RwLock<Option<OutboundPort>>,
    metrics: Arc<PortMetrics>,
    ids: DialectIds,
    state: Mutex<InstanceState>,
}

/// Cheap, cloneable access to a transport instance.
#[derive(Clone)]
pub struct InstanceHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("name", &self.inner.name)
            .field("local_eid", &self.local_eid())
            .finish()
    }
}

impl PartialEq for InstanceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InstanceHandle {}

impl InstanceHandle {
    pub fn id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.inner) as usize)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn local_eid(&self) -> Eid {
        Eid(self.inner.local_eid.load(Ordering::Acquire))
    }

    /// Changes the EID used as source and matched as destination. Takes
    /// effect for the next packet either worker handles.
    pub fn set_local_eid(&self, eid: Eid) {
        let old = self.inner.local_eid.swap(eid.0, Ordering::AcqRel);
        info!(instance = %self.inner.name, old = %Eid(old), new = %eid, "local eid changed");
    }

    pub fn medium_config(&self) -> Option<MediumConfig> {
        *self.inner.medium_config.read()
    }

    pub fn max_packet_payload(&self) -> usize {
        self.inner.max_packet_payload
    }

    pub fn ids(&self) -> &DialectIds {
        &self.inner.ids
    }

    pub fn state(&self) -> InstanceState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == InstanceState::Running
    }

    pub fn metrics(&self) -> PortMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Queues `payload` for transmission and waits until the outbound worker
    /// has written every packet (or failed).
    ///
    /// A full queue fails immediately with [`TransportError::QueueFull`];
    /// the caller owns any retry.
    pub fn send(&self, payload: &[u8], params: MsgParams) -> TransportResult<()> {
        if payload.is_empty() {
            return Err(FramingError::Empty.into());
        }
        if payload.len() > ASSEMBLY_LIMIT {
            return Err(FramingError::Oversize {
                len: payload.len(),
                limit: ASSEMBLY_LIMIT,
            }
            .into());
        }
        self.submit_and_wait(TxKind::Message {
            payload: payload.to_vec(),
            params,
        })
    }

    /// Writes an already-framed packet unchanged to `to`, waiting for the
    /// write to complete.
    pub fn bridge(&self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        Packet::from_raw(packet.to_vec())?;
        self.submit_and_wait(TxKind::Bridge {
            packet: packet.to_vec(),
            to,
        })
    }

    /// Queues a framed packet without waiting for completion. Used by
    /// inbound workers, which must never block on another instance.
    pub(crate) fn forward(&self, packet: Vec<u8>, to: MediumAddress) -> SubmitOutcome {
        let Some(port) = self.inner.port.read().clone() else {
            return SubmitOutcome::Closed;
        };
        port.try_submit(TxRequest {
            kind: TxKind::Bridge { packet, to },
            done: None,
        })
    }

    fn submit_and_wait(&self, kind: TxKind) -> TransportResult<()> {
        let port = self
            .inner
            .port
            .read()
            .clone()
            .ok_or(TransportError::NotRunning)?;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let outcome = port.try_submit(TxRequest {
            kind,
            done: Some(done_tx),
        });
        // A live sender would keep an abandoned request queued forever.
        drop(port);
        match outcome {
            SubmitOutcome::Accepted => done_rx.recv().unwrap_or(Err(TransportError::Closed)),
            SubmitOutcome::WouldBlock => Err(TransportError::QueueFull),
            SubmitOutcome::Closed => Err(TransportError::NotRunning),
        }
    }

    fn worker_died(&self, worker: &str) {
        let mut state = self.inner.state.lock();
        if *state != InstanceState::Running {
            return;
        }
        *state = InstanceState::Failed;
        self.inner.port.write().take();
        error!(instance = %self.inner.name, worker, "worker died; instance failed");
    }

    fn resolver(&self) -> Option<Arc<dyn EndpointResolver>> {
        self.inner.resolver.read().clone()
    }

    fn rx_handler(&self) -> Option<Arc<dyn RxHandler>> {
        self.inner.rx_handler.read().clone()
    }
}

/// Owner of one transport instance. Stops its workers when dropped.
pub struct TransportInstance {
    handle: InstanceHandle,
    workers: Option<WorkerSet>,
}

impl TransportInstance {
    pub fn new(config: InstanceConfig) -> TransportResult<Self> {
        config.validate()?;
        let inner = Inner {
            local_eid: AtomicU8::new(config.local_eid.0),
            name: config.name,
            max_packet_payload: config.max_packet_payload,
            queue_depth: config.queue_depth,
            medium_config: RwLock::new(None),
            medium: Mutex::new(None),
            resolver: RwLock::new(None),
            rx_handler: RwLock::new(None),
            port: RwLock::new(None),
            metrics: Arc::new(PortMetrics::default()),
            ids: DialectIds::default(),
            state: Mutex::new(InstanceState::Unconfigured),
        };
        Ok(Self {
            handle: InstanceHandle {
                inner: Arc::new(inner),
            },
            workers: None,
        })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> InstanceState {
        self.handle.state()
    }

    /// Binds the instance to a medium. Rejected while running, and when the
    /// medium's family does not match `config`.
    pub fn configure(
        &mut self,
        config: MediumConfig,
        medium: Box<dyn Medium>,
    ) -> TransportResult<()> {
        let inner = &self.handle.inner;
        let mut state = inner.state.lock();
        if *state == InstanceState::Running {
            return Err(TransportError::AlreadyRunning);
        }
        if medium.kind() != config.kind() {
            return Err(TransportError::InvalidConfig(
                "medium family does not match its configuration",
            ));
        }
        *inner.medium_config.write() = Some(config);
        *inner.medium.lock() = Some(Arc::new(Mutex::new(medium)));
        *state = InstanceState::Configured;
        debug!(instance = %inner.name, ?config, "medium configured");
        Ok(())
    }

    pub fn set_resolver(&self, resolver: Arc<dyn EndpointResolver>) {
        *self.handle.inner.resolver.write() = Some(resolver);
    }

    pub fn set_rx_handler(&self, handler: Arc<dyn RxHandler>) {
        *self.handle.inner.rx_handler.write() = Some(handler);
    }

    /// Creates the outbound queue and spawns both workers. On failure the
    /// instance stays `Configured`. A `Failed` instance is stopped first.
    pub fn start(&mut self) -> TransportResult<()> {
        if self.state() == InstanceState::Failed {
            self.stop();
        }
        let inner = Arc::clone(&self.handle.inner);
        let mut state = inner.state.lock();
        match *state {
            InstanceState::Running => return Err(TransportError::AlreadyRunning),
            InstanceState::Unconfigured => return Err(TransportError::NoMedium),
            InstanceState::Configured | InstanceState::Stopped | InstanceState::Failed => {}
        }
        let medium = inner.medium.lock().clone().ok_or(TransportError::NoMedium)?;

        let pair = make_port_pair(inner.queue_depth, Arc::clone(&inner.metrics));
        let owner = self.handle.clone();
        let mut workers = WorkerSet::new()
            .with_panic_hook(Arc::new(move |worker: &str| owner.worker_died(worker)));
        let spawned = workers
            .spawn(RxWorker {
                thread_name: format!("mctp-rx-{}", inner.name),
                handle: self.handle.clone(),
                medium: Arc::clone(&medium),
                reassembler: Reassembler::new(),
            })
            .and_then(|()| {
                workers.spawn(TxWorker {
                    thread_name: format!("mctp-tx-{}", inner.name),
                    handle: self.handle.clone(),
                    medium,
                    queue: pair.consumer,
                    tag_counter: 0,
                })
            });
        if let Err(err) = spawned {
            *state = InstanceState::Configured;
            // A panicking worker's hook takes the state lock.
            drop(state);
            workers.shutdown();
            return Err(TransportError::WorkerSpawn(err.to_string()));
        }

        *inner.port.write() = Some(pair.producer);
        self.workers = Some(workers);
        *state = InstanceState::Running;
        info!(instance = %inner.name, eid = %self.handle.local_eid(), "transport instance started");
        Ok(())
    }

    /// Stops both workers. Queued sends fail with [`TransportError::Closed`]
    /// and later sends with [`TransportError::NotRunning`].
    pub fn stop(&mut self) {
        let inner = &self.handle.inner;
        let Some(workers) = self.workers.take() else {
            return;
        };
        inner.port.write().take();
        workers.shutdown();
        *inner.state.lock() = InstanceState::Stopped;
        info!(instance = %inner.name, "transport instance stopped");
    }

    /// Stops the instance and releases its medium, resolver and handler.
    pub fn deinit(&mut self) {
        self.stop();
        let inner = &self.handle.inner;
        inner.medium.lock().take();
        inner.medium_config.write().take();
        inner.resolver.write().take();
        inner.rx_handler.write().take();
        *inner.state.lock() = InstanceState::Unconfigured;
    }
}

impl Drop for TransportInstance {
    fn drop(&mut self) {
        self.deinit();
    }
}

struct RxWorker {
    thread_name: String,
    handle: InstanceHandle,
    medium: SharedMedium,
    reassembler: Reassembler,
}

impl RxWorker {
    fn handle_frame(&mut self, frame: RxFrame) {
        let metrics = &self.handle.inner.metrics;
        let packet = match Packet::from_raw(frame.packet) {
            Ok(packet) => packet,
            Err(err) => {
                metrics.anomaly();
                warn!(instance = %self.handle.name(), "dropping packet: {err}");
                return;
            }
        };
        let header = packet.header();
        trace!(
            instance = %self.handle.name(),
            src = %header.src,
            dest = %header.dest,
            flags = header.flags(),
            "packet received"
        );

        let local = self.handle.local_eid();
        if header.dest != local && !header.dest.is_null() {
            self.forward(packet, header.dest);
            return;
        }

        match self.reassembler.push(&packet) {
            Ok(Some(message)) => {
                let params = RxParams {
                    src: message.src,
                    tag: message.tag,
                    tag_owner: message.tag_owner,
                    from: frame.from,
                };
                self.deliver(&message.payload, params);
            }
            Ok(None) => {}
            Err(err) => {
                metrics.anomaly();
                warn!(instance = %self.handle.name(), "dropping packet: {err}");
            }
        }
    }

    fn forward(&self, packet: Packet, dest: Eid) {
        let metrics = &self.handle.inner.metrics;
        let Some(resolver) = self.handle.resolver() else {
            metrics.anomaly();
            warn!(instance = %self.handle.name(), %dest, "no resolver for bridged packet");
            return;
        };
        let Some(route) = resolver.resolve(dest) else {
            metrics.anomaly();
            warn!(instance = %self.handle.name(), %dest, "no route for bridged packet");
            return;
        };
        match route.instance.forward(packet.into_raw(), route.to) {
            SubmitOutcome::Accepted => {
                trace!(
                    from = %self.handle.name(),
                    to = %route.instance.name(),
                    %dest,
                    "packet bridged"
                );
            }
            outcome => {
                metrics.anomaly();
                warn!(
                    from = %self.handle.name(),
                    to = %route.instance.name(),
                    %dest,
                    ?outcome,
                    "bridged packet dropped"
                );
            }
        }
    }

    fn deliver(&self, payload: &[u8], params: RxParams) {
        let Some(handler) = self.handle.rx_handler() else {
            debug!(
                instance = %self.handle.name(),
                src = %params.src,
                "no receive handler; message dropped"
            );
            return;
        };
        self.handle.inner.metrics.delivered();
        handler.on_message(&self.handle, payload, params);
    }
}

impl WorkerLoop for RxWorker {
    fn poll(&mut self) -> Tick {
        let read = self.medium.lock().read();
        match read {
            Ok(Some(frame)) => {
                self.handle_frame(frame);
                Tick::Worked
            }
            Ok(None) => Tick::Idle,
            Err(err) => {
                warn!(instance = %self.handle.name(), "medium read failed: {err}");
                Tick::Idle
            }
        }
    }

    fn name(&self) -> &str {
        &self.thread_name
    }

    fn idle_backoff(&self) -> Option<Duration> {
        Some(RX_IDLE_SLEEP)
    }
}

struct TxWorker {
    thread_name: String,
    handle: InstanceHandle,
    medium: SharedMedium,
    queue: OutboundQueue,
    tag_counter: u8,
}

impl TxWorker {
    fn write(&self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        let metrics = &self.handle.inner.metrics;
        let written = self.medium.lock().write(packet, to);
        match &written {
            Ok(()) => metrics.packet_written(),
            Err(err) => {
                metrics.write_failed();
                warn!(instance = %self.handle.name(), dest = to.addr, "medium write failed: {err}");
            }
        }
        written
    }

    fn send_message(&mut self, payload: &[u8], params: MsgParams) -> TransportResult<()> {
        let tag = if params.tag_owner {
            MsgTag::new(self.tag_counter & TAG_MASK)
        } else {
            params.tag
        };
        let template =
            TransportHeader::new(params.dest, self.handle.local_eid(), tag, params.tag_owner);
        let packets = fragment(template, payload, self.handle.max_packet_payload());
        trace!(
            instance = %self.handle.name(),
            dest = %params.dest,
            tag = tag.value(),
            packets = packets.len(),
            "sending message"
        );

        let mut result = Ok(());
        for packet in packets {
            if let Err(err) = self.write(packet.as_bytes(), params.to) {
                result = Err(err);
                break;
            }
        }
        // Only requests consume a tag, whether or not the write succeeded.
        if params.tag_owner {
            self.tag_counter = self.tag_counter.wrapping_add(1);
        }
        result
    }
}

impl WorkerLoop for TxWorker {
    fn poll(&mut self) -> Tick {
        let request = match self.queue.next(TX_IDLE_WAIT) {
            Dequeue::Ready(request) => request,
            Dequeue::Empty => return Tick::Idle,
            Dequeue::Closed => return Tick::Finished,
        };
        let result = match &request.kind {
            TxKind::Bridge { packet, to } => self.write(packet, *to),
            TxKind::Message { payload, params } => self.send_message(payload, *params),
        };
        request.complete(result);
        Tick::Worked
    }

    fn name(&self) -> &str {
        &self.thread_name
    }
}

impl Drop for TxWorker {
    fn drop(&mut self) {
        let failed = self.queue.drain_closed();
        if failed > 0 {
            debug!(instance = %self.handle.name(), failed, "outbound queue drained on stop");
        }
    }
}
