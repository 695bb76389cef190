//! Platform description loaded from TOML.
//!
//! ```toml
//! local_eid = 0x0A
//! max_packet_payload = 64
//!
//! [[ports]]
//! name = "smbus1"
//! medium = { kind = "smbus", bus = 1, addr = 0x20 }
//!
//! [[routes]]
//! eid = 0x12
//! bus = 1
//! addr = 0x64
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use transport::smbus::SMBUS_MAX_PACKET_PAYLOAD;
use transport::{Eid, MediumConfig, MediumKind, DEFAULT_MAX_PACKET_PAYLOAD};
use transport_fabric::RouteEntry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Endpoint id every port answers to.
    pub local_eid: u8,
    pub max_packet_payload: usize,
    pub ports: Vec<PortConfig>,
    pub routes: Vec<RouteConfig>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            local_eid: Eid::DEFAULT.0,
            max_packet_payload: DEFAULT_MAX_PACKET_PAYLOAD,
            ports: Vec::new(),
            routes: Vec::new(),
        }
    }
}

/// One transport instance, named so a medium can be supplied for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    pub name: String,
    pub medium: MediumConfig,
}

/// Endpoint `eid` sits at `addr` on the port bound to `bus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub eid: u8,
    pub bus: u8,
    pub addr: u8,
}

impl From<RouteConfig> for RouteEntry {
    fn from(route: RouteConfig) -> Self {
        RouteEntry {
            eid: Eid(route.eid),
            bus: route.bus,
            addr: route.addr,
        }
    }
}

impl PlatformConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse platform config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Checks what the instances and route table would reject later, with
    /// the offending port or route named.
    pub fn validate(&self) -> Result<()> {
        let local = Eid(self.local_eid);
        if local == Eid::NULL || self.local_eid == 0xFF {
            bail!("local_eid {local} is reserved");
        }
        if self.max_packet_payload == 0 {
            bail!("max_packet_payload must be non-zero");
        }
        for (i, port) in self.ports.iter().enumerate() {
            if self.ports[..i].iter().any(|p| p.name == port.name) {
                bail!("duplicate port name {:?}", port.name);
            }
            if self.ports[..i]
                .iter()
                .any(|p| p.medium.bus() == port.medium.bus())
            {
                bail!("ports {:?} and another share bus {}", port.name, port.medium.bus());
            }
            if port.medium.kind() == MediumKind::Smbus
                && self.max_packet_payload > SMBUS_MAX_PACKET_PAYLOAD
            {
                bail!(
                    "max_packet_payload {} exceeds the {SMBUS_MAX_PACKET_PAYLOAD} byte smbus \
                     limit of port {:?}",
                    self.max_packet_payload,
                    port.name
                );
            }
        }
        for route in &self.routes {
            if !self.ports.iter().any(|p| p.medium.bus() == route.bus) {
                bail!("route to {} names bus {} with no port", Eid(route.eid), route.bus);
            }
        }
        Ok(())
    }
}
