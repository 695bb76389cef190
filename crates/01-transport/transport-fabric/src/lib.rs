//! Transport instances on top of the wire layer.
//!
//! A [`TransportInstance`] binds one [`transport::Medium`] to an inbound
//! worker (poll, reassemble, bridge, deliver) and an outbound worker (frame,
//! write, report completion). Instances find each other for bridging through
//! an [`EndpointResolver`], usually a [`RouteTable`].

mod error;
mod ids;
mod instance;
mod port;
mod resolver;
mod runtime;
mod service;

pub use error::{FabricError, FabricResult};
pub use ids::{DialectIds, InstanceIdPool, TagCounter, NCSI_INSTANCE_IDS, PLDM_INSTANCE_IDS};
pub use instance::{
    InstanceConfig, InstanceHandle, InstanceId, InstanceState, TransportInstance, RX_IDLE_SLEEP,
    TX_QUEUE_DEPTH,
};
pub use port::PortMetricsSnapshot;
pub use resolver::{EndpointResolver, Route, RouteEntry, RouteTable};
pub use runtime::{PanicHook, Tick, WorkerLoop, WorkerSet};
pub use service::{MsgParams, RxHandler, RxParams, SubmitOutcome};
