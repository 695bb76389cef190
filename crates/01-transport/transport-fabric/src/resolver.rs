//! Endpoint resolution: which port, and which medium address on it, reaches
//! a destination EID.

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::debug;

use transport::{Eid, MediumAddress};

use crate::error::{FabricError, FabricResult};
use crate::instance::InstanceHandle;

/// Where to send traffic for one endpoint.
#[derive(Clone)]
pub struct Route {
    pub eid: Eid,
    pub instance: InstanceHandle,
    pub to: MediumAddress,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("eid", &self.eid)
            .field("instance", &self.instance.name())
            .field("to", &self.to)
            .finish()
    }
}

/// Maps a destination EID to an outbound instance.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, eid: Eid) -> Option<Route>;
}

impl<F> EndpointResolver for F
where
    F: Fn(Eid) -> Option<Route> + Send + Sync,
{
    fn resolve(&self, eid: Eid) -> Option<Route> {
        self(eid)
    }
}

/// One configured route: endpoint `eid` sits at `addr` on bus `bus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub eid: Eid,
    pub bus: u8,
    pub addr: u8,
}

/// Static route table over a set of ports indexed by bus number.
#[derive(Default)]
pub struct RouteTable {
    ports: RwLock<SmallVec<[InstanceHandle; 4]>>,
    routes: RwLock<Vec<RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configured instance. Its bus number must be unique.
    pub fn add_port(&self, instance: InstanceHandle) -> FabricResult<()> {
        let bus = instance
            .medium_config()
            .ok_or(FabricError::InvalidConfig("port has no medium configured"))?
            .bus();
        let mut ports = self.ports.write();
        if ports
            .iter()
            .any(|p| p.medium_config().map(|c| c.bus()) == Some(bus))
        {
            return Err(FabricError::InvalidConfig("two ports share one bus"));
        }
        ports.push(instance);
        Ok(())
    }

    /// Adds or replaces the route for `entry.eid`.
    pub fn add_route(&self, entry: RouteEntry) -> FabricResult<()> {
        if self.port_by_bus(entry.bus).is_none() {
            return Err(FabricError::UnknownBus(entry.bus));
        }
        let mut routes = self.routes.write();
        routes.retain(|r| r.eid != entry.eid);
        routes.push(entry);
        Ok(())
    }

    pub fn port_by_bus(&self, bus: u8) -> Option<InstanceHandle> {
        self.ports
            .read()
            .iter()
            .find(|p| p.medium_config().map(|c| c.bus()) == Some(bus))
            .cloned()
    }

    pub fn ports(&self) -> SmallVec<[InstanceHandle; 4]> {
        self.ports.read().clone()
    }

    pub fn routes(&self) -> Vec<RouteEntry> {
        self.routes.read().clone()
    }

    pub fn entry(&self, eid: Eid) -> Option<RouteEntry> {
        self.routes.read().iter().find(|r| r.eid == eid).copied()
    }

    /// Resolves `eid`, failing with [`FabricError::Unresolved`] when no
    /// route or no port matches.
    pub fn route(&self, eid: Eid) -> FabricResult<Route> {
        self.resolve(eid).ok_or(FabricError::Unresolved(eid))
    }
}

impl EndpointResolver for RouteTable {
    fn resolve(&self, eid: Eid) -> Option<Route> {
        let entry = self.entry(eid)?;
        let Some(instance) = self.port_by_bus(entry.bus) else {
            debug!(%eid, bus = entry.bus, "route points at a missing port");
            return None;
        };
        let kind = instance.medium_config()?.kind();
        Some(Route {
            eid,
            instance,
            to: MediumAddress::new(kind, entry.addr),
        })
    }
}
