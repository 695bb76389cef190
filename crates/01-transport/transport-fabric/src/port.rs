use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use transport::{MediumAddress, TransportResult};

use crate::service::{MsgParams, SubmitOutcome};

/// Work item for the outbound worker.
pub(crate) enum TxKind {
    /// Fragment `payload` and write it under a fresh transport header.
    Message { payload: Vec<u8>, params: MsgParams },
    /// Write an already-framed packet unchanged.
    Bridge { packet: Vec<u8>, to: MediumAddress },
}

pub(crate) struct TxRequest {
    pub(crate) kind: TxKind,
    /// One-slot completion channel; `None` for fire-and-forget forwards.
    pub(crate) done: Option<Sender<TransportResult<()>>>,
}

impl TxRequest {
    pub(crate) fn complete(self, result: TransportResult<()>) {
        if let Some(done) = self.done {
            // The sender may have given up; nothing to report to.
            let _ = done.try_send(result);
        }
    }
}

/// Producer half of an instance's bounded outbound queue.
#[derive(Clone)]
pub(crate) struct OutboundPort {
    tx: Sender<TxRequest>,
    metrics: Arc<PortMetrics>,
}

impl OutboundPort {
    pub(crate) fn try_submit(&self, request: TxRequest) -> SubmitOutcome {
        let bridged = matches!(request.kind, TxKind::Bridge { .. });
        let outcome = match self.tx.try_send(request) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(TrySendError::Full(_)) => SubmitOutcome::WouldBlock,
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Closed,
        };
        self.metrics.record(outcome, bridged);
        outcome
    }
}

/// Consumer half, drained by the outbound worker.
pub(crate) struct OutboundQueue {
    rx: Receiver<TxRequest>,
}

pub(crate) enum Dequeue {
    Ready(TxRequest),
    Empty,
    Closed,
}

impl OutboundQueue {
    pub(crate) fn next(&self, wait: Duration) -> Dequeue {
        match self.rx.recv_timeout(wait) {
            Ok(request) => Dequeue::Ready(request),
            Err(RecvTimeoutError::Timeout) => Dequeue::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Closed,
        }
    }

    /// Fails every queued request; used once the worker stops.
    pub(crate) fn drain_closed(&self) -> usize {
        let mut drained = 0;
        while let Ok(request) = self.rx.try_recv() {
            request.complete(Err(transport::TransportError::Closed));
            drained += 1;
        }
        drained
    }
}

pub(crate) struct PortPair {
    pub(crate) producer: OutboundPort,
    pub(crate) consumer: OutboundQueue,
}

pub(crate) fn make_port_pair(depth: usize, metrics: Arc<PortMetrics>) -> PortPair {
    let (tx, rx) = crossbeam_channel::bounded(depth);
    PortPair {
        producer: OutboundPort { tx, metrics },
        consumer: OutboundQueue { rx },
    }
}

/// Lifetime counters for one transport instance.
#[derive(Default)]
pub(crate) struct PortMetrics {
    accepted: AtomicU32,
    would_block: AtomicU32,
    bridged: AtomicU32,
    packets_written: AtomicU32,
    write_failures: AtomicU32,
    delivered: AtomicU32,
    anomalies: AtomicU32,
}

impl PortMetrics {
    fn record(&self, outcome: SubmitOutcome, bridged: bool) {
        match outcome {
            SubmitOutcome::Accepted => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                if bridged {
                    self.bridged.fetch_add(1, Ordering::Relaxed);
                }
            }
            SubmitOutcome::WouldBlock => {
                self.would_block.fetch_add(1, Ordering::Relaxed);
            }
            SubmitOutcome::Closed => {}
        }
    }

    pub(crate) fn packet_written(&self) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PortMetricsSnapshot {
        PortMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            would_block: self.would_block.load(Ordering::Relaxed),
            bridged: self.bridged.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortMetricsSnapshot {
    pub accepted: u32,
    pub would_block: u32,
    /// Raw packets forwarded for other endpoints.
    pub bridged: u32,
    pub packets_written: u32,
    pub write_failures: u32,
    /// Reassembled messages handed to the receive handler.
    pub delivered: u32,
    /// Malformed, orphaned or unroutable inbound packets.
    pub anomalies: u32,
}
