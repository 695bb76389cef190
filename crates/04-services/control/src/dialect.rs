use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use correlation::{
    read_with_retry, CorrelationEngine, CorrelationResult, ReadPolicy, ReadSlot, Registration,
    RegistrationHandle,
};
use dialect_abi::{
    attempt, send_tracked, CommandTable, Dialect, DialectError, DialectResult, HandlerOutcome,
    Outcome, Request, TypeRegistry,
};
use transport::{Eid, MsgType};
use transport_fabric::{InstanceHandle, InstanceId, MsgParams, Route, RouteTable, RxParams};

use crate::header::{cc, cmd, completion_code, ControlHeader, HEADER_LEN};
use crate::responder;

/// Pending control requests are keyed by instance, instance id and command.
pub type ControlKey = (InstanceId, u8, u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    pub timeout: Duration,
    pub sweep_interval: Duration,
    /// Attempts per [`ControlDialect::read`].
    pub retries: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            sweep_interval: Duration::from_millis(1000),
            retries: 1,
        }
    }
}

/// Get Endpoint ID response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointId {
    pub eid: Eid,
    pub eid_type: u8,
    pub endpoint_type: u8,
    pub medium_info: u8,
}

/// Set Endpoint ID response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EidAssignment {
    pub status: u8,
    pub eid: Eid,
    pub pool_size: u8,
}

/// Control dialect: answers the built-in commands and correlates responses
/// to requests sent through [`send`](Self::send) or [`read`](Self::read).
pub struct ControlDialect {
    config: ControlConfig,
    engine: CorrelationEngine<ControlKey>,
    commands: CommandTable,
}

impl ControlDialect {
    /// `ports` receive Set Endpoint ID; `types` answers message type support.
    pub fn new(config: ControlConfig, ports: Arc<RouteTable>, types: TypeRegistry) -> Self {
        let commands = CommandTable::new();
        responder::install(&commands, ports, types);
        Self {
            config,
            engine: CorrelationEngine::new("mctp-ctrl"),
            commands,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Extra or replacement command handlers go here.
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn engine(&self) -> &CorrelationEngine<ControlKey> {
        &self.engine
    }

    pub fn start(&self) -> CorrelationResult<()> {
        self.engine.spawn_sweeper(self.config.sweep_interval)
    }

    pub fn shutdown(&self) -> usize {
        self.engine.shutdown()
    }

    /// Sends `cmd` to `route` and registers for its response. `on_response`
    /// receives the body after the header, completion code first.
    pub fn send(
        &self,
        route: &Route,
        cmd: u8,
        data: &[u8],
        on_response: impl FnOnce(Vec<u8>) + Send + 'static,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> DialectResult<RegistrationHandle<ControlKey>> {
        let (key, msg) = self.prepare(route, cmd, data);
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

    /// Sends `cmd` and waits for a successful response, returning the data
    /// after the completion code.
    pub fn read(&self, route: &Route, cmd: u8, data: &[u8]) -> DialectResult<Vec<u8>> {
        let policy = ReadPolicy::new(self.config.timeout).with_retries(self.config.retries);
        let body = read_with_retry(policy, |slot: ReadSlot<Vec<u8>>| {
            let (key, msg) = self.prepare(route, cmd, data);
            let timed_out = slot.clone();
            let registration = Registration::new(key, self.config.timeout)
                .on_response(move |body| slot.respond(body))
                .on_timeout(move || timed_out.timed_out());
            attempt(send_tracked(
                &self.engine,
                registration,
                &route.instance,
                &msg,
                MsgParams::request(route.eid, route.to),
            ))
        })?;
        match body.split_first() {
            Some((&cc::SUCCESS, rest)) => Ok(rest.to_vec()),
            Some((&code, _)) => {
                warn!("control cmd {cmd:#04x} to {} failed with cc {code:#04x}", route.eid);
                Err(DialectError::Completion { code: code.into() })
            }
            None => Err(DialectError::Malformed("missing completion code")),
        }
    }

    pub fn get_endpoint_id(&self, route: &Route) -> DialectResult<EndpointId> {
        let data = self.read(route, cmd::GET_ENDPOINT_ID, &[])?;
        let [eid, types, medium_info, ..] = *data else {
            return Err(DialectError::Malformed("short get endpoint id response"));
        };
        Ok(EndpointId {
            eid: Eid(eid),
            eid_type: types & 0x03,
            endpoint_type: (types >> 4) & 0x03,
            medium_info,
        })
    }

    /// Assigns `eid` to the endpoint behind `route`.
    pub fn set_endpoint_id(&self, route: &Route, eid: Eid) -> DialectResult<EidAssignment> {
        let data = self.read(route, cmd::SET_ENDPOINT_ID, &[0x00, eid.0])?;
        let [status, eid, pool_size, ..] = *data else {
            return Err(DialectError::Malformed("short set endpoint id response"));
        };
        Ok(EidAssignment {
            status,
            eid: Eid(eid),
            pool_size,
        })
    }

    pub fn message_type_support(&self, route: &Route) -> DialectResult<Vec<MsgType>> {
        let data = self.read(route, cmd::GET_MESSAGE_TYPE_SUPPORT, &[])?;
        let Some((&count, types)) = data.split_first() else {
            return Err(DialectError::Malformed("missing type count"));
        };
        let types = types
            .get(..usize::from(count))
            .ok_or(DialectError::Malformed("type list shorter than count"))?;
        Ok(types.iter().map(|&t| MsgType(t)).collect())
    }

    fn prepare(&self, route: &Route, cmd: u8, data: &[u8]) -> (ControlKey, Vec<u8>) {
        let inst_id = route.instance.ids().control.next();
        let header = ControlHeader::request(inst_id, cmd);
        let mut msg = Vec::with_capacity(HEADER_LEN + data.len());
        msg.extend_from_slice(&header.encode());
        msg.extend_from_slice(data);
        ((route.instance.id(), header.inst_id, cmd), msg)
    }

    fn answer(
        &self,
        instance: &InstanceHandle,
        header: ControlHeader,
        body: &[u8],
        params: RxParams,
    ) -> Outcome {
        let request = Request::new(
            instance,
            params,
            header.inst_id,
            header.cmd,
            body,
            header.reply(),
        );
        let reply = match self.commands.dispatch(&request) {
            Ok(HandlerOutcome::Reply(body)) => body,
            Ok(HandlerOutcome::Later) => return Outcome::Deferred,
            Err(err) => {
                warn!("control cmd {:#04x} from {}: {err}", header.cmd, params.src);
                vec![completion_code(err)]
            }
        };
        match instance.send(&request.response(&reply), params.reply()) {
            Ok(()) => Outcome::Responded,
            Err(err) => {
                warn!("control response to {} not sent: {err}", params.src);
                Outcome::SendFailed
            }
        }
    }
}

impl Dialect for ControlDialect {
    fn msg_type(&self) -> MsgType {
        MsgType::CONTROL
    }

    fn name(&self) -> &'static str {
        "control"
    }

    fn handle_inbound(
        &self,
        instance: &InstanceHandle,
        payload: &[u8],
        params: RxParams,
    ) -> Outcome {
        let Some(header) = ControlHeader::parse(payload) else {
            return Outcome::Dropped("short control header");
        };
        let body = &payload[HEADER_LEN..];
        if header.request {
            debug!("control cmd {:#04x} inst {} from {}", header.cmd, header.inst_id, params.src);
            return self.answer(instance, header, body, params);
        }
        let key = (instance.id(), header.inst_id, header.cmd);
        if self.engine.on_inbound_response(&key, body.to_vec()) {
            Outcome::Matched
        } else {
            Outcome::Unmatched
        }
    }
}

impl Drop for ControlDialect {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
