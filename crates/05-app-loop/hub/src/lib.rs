//! Platform assembly for the management transport.
//!
//! [`MctpHub`] turns a [`PlatformConfig`] plus one [`Medium`] per port into
//! running transport instances that share a route table and a message
//! router, with all four dialects registered and their sweepers started.

pub mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use dialect_abi::MessageRouter;
use dialect_cci::{CciConfig, CciDialect};
use dialect_control::{ControlConfig, ControlDialect};
use dialect_ncsi::{NcsiConfig, NcsiDialect};
use dialect_pldm::{PldmConfig, PldmDialect};
use transport::{Eid, Medium};
use transport_fabric::{
    FabricResult, InstanceConfig, InstanceHandle, Route, RouteTable, TransportInstance,
};

pub use config::{PlatformConfig, PortConfig, RouteConfig};

/// Timing for each dialect's correlation engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DialectConfigs {
    pub control: ControlConfig,
    pub pldm: PldmConfig,
    pub ncsi: NcsiConfig,
    pub cci: CciConfig,
}

/// Running ports and dialects for one platform.
pub struct MctpHub {
    ports: Vec<TransportInstance>,
    routes: Arc<RouteTable>,
    router: Arc<MessageRouter>,
    control: Arc<ControlDialect>,
    pldm: Arc<PldmDialect>,
    ncsi: Arc<NcsiDialect>,
    cci: Arc<CciDialect>,
}

impl MctpHub {
    pub fn builder() -> MctpHubBuilder {
        MctpHubBuilder::new()
    }

    /// Handle of the port named `name` in the platform config.
    pub fn port(&self, name: &str) -> Option<InstanceHandle> {
        self.ports
            .iter()
            .map(TransportInstance::handle)
            .find(|handle| handle.name() == name)
    }

    pub fn ports(&self) -> impl Iterator<Item = InstanceHandle> + '_ {
        self.ports.iter().map(TransportInstance::handle)
    }

    pub fn route(&self, eid: Eid) -> FabricResult<Route> {
        self.routes.route(eid)
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn control(&self) -> &Arc<ControlDialect> {
        &self.control
    }

    pub fn pldm(&self) -> &Arc<PldmDialect> {
        &self.pldm
    }

    pub fn ncsi(&self) -> &Arc<NcsiDialect> {
        &self.ncsi
    }

    pub fn cci(&self) -> &Arc<CciDialect> {
        &self.cci
    }

    /// Stops the sweepers, failing every pending request, then the ports.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let abandoned = self.control.shutdown()
            + self.pldm.shutdown()
            + self.ncsi.shutdown()
            + self.cci.shutdown();
        if abandoned > 0 {
            warn!(abandoned, "hub shut down with requests in flight");
        }
        for port in &mut self.ports {
            port.stop();
        }
    }
}

impl Drop for MctpHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`MctpHub`].
pub struct MctpHubBuilder {
    config: Option<PlatformConfig>,
    media: HashMap<String, Box<dyn Medium>>,
    dialects: DialectConfigs,
}

impl MctpHubBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            media: HashMap::new(),
            dialects: DialectConfigs::default(),
        }
    }

    pub fn config(mut self, config: PlatformConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Supplies the medium for the port called `name`.
    pub fn medium(mut self, name: impl Into<String>, medium: Box<dyn Medium>) -> Self {
        self.media.insert(name.into(), medium);
        self
    }

    pub fn dialects(mut self, dialects: DialectConfigs) -> Self {
        self.dialects = dialects;
        self
    }

    /// Creates, wires and starts everything. Nothing keeps running if this
    /// fails: ports already started are stopped as they drop.
    pub fn build(mut self) -> Result<MctpHub> {
        let config = self
            .config
            .take()
            .ok_or_else(|| anyhow!("hub requires a platform config"))?;
        config.validate()?;
        if config.ports.is_empty() {
            bail!("platform config has no ports");
        }

        let routes = Arc::new(RouteTable::new());
        let router = Arc::new(MessageRouter::new());
        let mut ports = Vec::with_capacity(config.ports.len());
        for port in &config.ports {
            let medium = self
                .media
                .remove(&port.name)
                .ok_or_else(|| anyhow!("no medium supplied for port {:?}", port.name))?;
            let mut instance = TransportInstance::new(
                InstanceConfig::new(port.name.clone())
                    .with_local_eid(Eid(config.local_eid))
                    .with_max_packet_payload(config.max_packet_payload),
            )
            .with_context(|| format!("port {:?}", port.name))?;
            instance
                .configure(port.medium, medium)
                .with_context(|| format!("configuring port {:?}", port.name))?;
            instance.set_resolver(routes.clone());
            instance.set_rx_handler(router.clone());
            routes
                .add_port(instance.handle())
                .with_context(|| format!("registering port {:?}", port.name))?;
            ports.push(instance);
        }
        for name in self.media.keys() {
            warn!(port = %name, "medium supplied for a port the config does not name");
        }
        for route in &config.routes {
            routes
                .add_route((*route).into())
                .with_context(|| format!("route to {}", Eid(route.eid)))?;
        }

        let control = Arc::new(ControlDialect::new(
            self.dialects.control,
            routes.clone(),
            router.types(),
        ));
        let pldm = Arc::new(PldmDialect::new(self.dialects.pldm));
        let ncsi = Arc::new(NcsiDialect::new(self.dialects.ncsi));
        let cci = Arc::new(CciDialect::new(self.dialects.cci));
        router.register(control.clone());
        router.register(pldm.clone());
        router.register(ncsi.clone());
        router.register(cci.clone());

        control.start().context("control sweeper")?;
        pldm.start().context("pldm sweeper")?;
        ncsi.start().context("ncsi sweeper")?;
        cci.start().context("cci sweeper")?;
        for port in &mut ports {
            let name = port.handle().name().to_owned();
            port.start()
                .with_context(|| format!("starting port {name:?}"))?;
        }
        info!(
            ports = ports.len(),
            routes = config.routes.len(),
            local_eid = %Eid(config.local_eid),
            "hub running"
        );

        Ok(MctpHub {
            ports,
            routes,
            router,
            control,
            pldm,
            ncsi,
            cci,
        })
    }
}

impl Default for MctpHubBuilder {
    fn default() -> Self {
        Self::new()
    }
}
