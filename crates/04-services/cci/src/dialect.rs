use std::time::Duration;

use log::{debug, warn};

use correlation::{
    read_with_retry, CorrelationEngine, CorrelationResult, ReadPolicy, ReadSlot, Registration,
    RegistrationHandle, DEFAULT_READ_RETRIES,
};
use dialect_abi::{attempt, send_tracked, Dialect, DialectError, DialectResult, Outcome};
use transport::{MsgType, ASSEMBLY_LIMIT};
use transport_fabric::{InstanceHandle, InstanceId, MsgParams, Route, RxParams};

use crate::commands::{
    op, transfer_request, ActivateAction, FirmwareInfo, HealthInfo, TransferAction,
    FW_REVISION_LEN,
};
use crate::header::{CciHeader, HEADER_LEN};

/// Instance, message tag and opcode.
pub type CciKey = (InstanceId, u8, u16);

/// A matched response: return code, status and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CciResponse {
    pub ret: u16,
    pub stat: u16,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CciConfig {
    pub timeout: Duration,
    pub sweep_interval: Duration,
    pub retries: u32,
}

impl Default for CciConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            sweep_interval: Duration::from_millis(1000),
            retries: DEFAULT_READ_RETRIES,
        }
    }
}

pub struct CciDialect {
    config: CciConfig,
    engine: CorrelationEngine<CciKey, CciResponse>,
}

impl CciDialect {
    pub fn new(config: CciConfig) -> Self {
        Self {
            config,
            engine: CorrelationEngine::new("cci"),
        }
    }

    pub fn config(&self) -> &CciConfig {
        &self.config
    }

    pub fn engine(&self) -> &CorrelationEngine<CciKey, CciResponse> {
        &self.engine
    }

    pub fn start(&self) -> CorrelationResult<()> {
        self.engine.spawn_sweeper(self.config.sweep_interval)
    }

    pub fn shutdown(&self) -> usize {
        self.engine.shutdown()
    }

    /// Sends `op` with a fresh message tag.
    pub fn send(
        &self,
        route: &Route,
        op: u16,
        data: &[u8],
        on_response: impl FnOnce(CciResponse) + Send + 'static,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> DialectResult<RegistrationHandle<CciKey, CciResponse>> {
        let (key, msg) = self.prepare(route, op, data)?;
        let registration = Registration::new(key, self.config.timeout)
            .on_response(on_response)
            .on_timeout(on_timeout);
        send_tracked(
            &self.engine,
            registration,
            &route.instance,
            &msg,
            MsgParams::request(route.eid, route.to),
        )
    }

    /// Sends `op` and waits for a response with a zero return code. A
    /// non-zero return code counts as a failed attempt.
    pub fn read(&self, route: &Route, op: u16, data: &[u8]) -> DialectResult<Vec<u8>> {
        if data.len() + HEADER_LEN > ASSEMBLY_LIMIT {
            return Err(DialectError::Malformed("cci request exceeds the message limit"));
        }
        let policy = ReadPolicy::new(self.config.timeout).with_retries(self.config.retries);
        let payload = read_with_retry(policy, |slot: ReadSlot<Vec<u8>>| {
            let timed_out = slot.clone();
            let sent = self.prepare(route, op, data).and_then(|(key, msg)| {
                let registration = Registration::new(key, self.config.timeout)
                    .on_response(move |response: CciResponse| {
                        if response.ret == 0 {
                            slot.respond(response.payload);
                        } else {
                            warn!("cci op {op:#06x} returned {:#06x}", response.ret);
                            slot.reject();
                        }
                    })
                    .on_timeout(move || timed_out.timed_out());
                send_tracked(
                    &self.engine,
                    registration,
                    &route.instance,
                    &msg,
                    MsgParams::request(route.eid, route.to),
                )
            });
            attempt(sent)
        })?;
        Ok(payload)
    }

    pub fn health_info(&self, route: &Route) -> DialectResult<HealthInfo> {
        let payload = self.read(route, op::GET_HEALTH_INFO, &[])?;
        HealthInfo::parse(&payload).ok_or(DialectError::Malformed("health info length"))
    }

    pub fn firmware_info(&self, route: &Route) -> DialectResult<FirmwareInfo> {
        let payload = self.read(route, op::GET_FW_INFO, &[])?;
        FirmwareInfo::parse(&payload).ok_or(DialectError::Malformed("firmware info length"))
    }

    /// Revision of the firmware slot the device is running.
    pub fn active_firmware_revision(
        &self,
        route: &Route,
    ) -> DialectResult<[u8; FW_REVISION_LEN]> {
        let info = self.firmware_info(route)?;
        info.active_revision()
            .copied()
            .ok_or(DialectError::Malformed("no valid active firmware slot"))
    }

    /// Sends one image chunk of at most 128 bytes at `offset`.
    pub fn transfer_firmware(
        &self,
        route: &Route,
        action: TransferAction,
        slot: u8,
        offset: u32,
        chunk: &[u8],
    ) -> DialectResult<()> {
        let request = transfer_request(action, slot, offset, chunk)
            .ok_or(DialectError::Malformed("firmware chunk exceeds 128 bytes"))?;
        self.read(route, op::TRANSFER_FW, &request)?;
        Ok(())
    }

    pub fn activate_firmware(
        &self,
        route: &Route,
        action: ActivateAction,
        slot: u8,
    ) -> DialectResult<()> {
        self.read(route, op::ACTIVATE_FW, &[action as u8, slot])?;
        Ok(())
    }

    fn prepare(&self, route: &Route, op: u16, data: &[u8]) -> DialectResult<(CciKey, Vec<u8>)> {
        if data.len() + HEADER_LEN > ASSEMBLY_LIMIT {
            return Err(DialectError::Malformed("cci request exceeds the message limit"));
        }
        let tag = route.instance.ids().cci.next();
        let header = CciHeader::request(tag, op, data.len() as u32);
        let mut msg = Vec::with_capacity(HEADER_LEN + data.len());
        msg.extend_from_slice(&header.encode());
        msg.extend_from_slice(data);
        Ok(((route.instance.id(), tag, op), msg))
    }
}

impl Dialect for CciDialect {
    fn msg_type(&self) -> MsgType {
        MsgType::CCI
    }

    fn name(&self) -> &'static str {
        "cci"
    }

    fn handle_inbound(
        &self,
        instance: &InstanceHandle,
        payload: &[u8],
        params: RxParams,
    ) -> Outcome {
        let Some(header) = CciHeader::parse(payload) else {
            return Outcome::Dropped("short cci header");
        };
        if !header.response {
            debug!(
                "{}: cci request {:#06x} from {} ignored",
                instance.name(),
                header.op,
                params.src
            );
            return Outcome::Dropped("cci requests are not served");
        }
        let body = &payload[HEADER_LEN..];
        let len = body.len().min(header.payload_len as usize);
        let response = CciResponse {
            ret: header.ret,
            stat: header.stat,
            payload: body[..len].to_vec(),
        };
        let key = (instance.id(), header.tag, header.op);
        if self.engine.on_inbound_response(&key, response) {
            Outcome::Matched
        } else {
            Outcome::Unmatched
        }
    }
}

impl Drop for CciDialect {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
