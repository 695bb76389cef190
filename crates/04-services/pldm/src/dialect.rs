use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use correlation::{
    read_with_retry, CorrelationEngine, CorrelationResult, ReadPolicy, ReadSlot, Registration,
    RegistrationHandle, DEFAULT_READ_RETRIES,
};
use dialect_abi::{
    attempt, send_tracked, CommandTable, Dialect, DialectError, DialectResult, HandlerOutcome,
    Outcome, Request,
};
use transport::MsgType;
use transport_fabric::{InstanceHandle, InstanceId, MsgParams, Route, RxParams};

use crate::header::{cc, completion_code, pldm_type, PldmHeader, HEADER_LEN};
use crate::types::{base_cmd, install_base, TypeTable, COMMAND_BITMAP_LEN, TYPE_BITMAP_LEN};

/// Instance, instance id, PLDM type and command.
pub type PldmKey = (InstanceId, u8, u8, u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PldmConfig {
    pub timeout: Duration,
    pub sweep_interval: Duration,
    pub retries: u32,
    /// Terminus id reported by Get TID.
    pub tid: u8,
}

impl Default for PldmConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            sweep_interval: Duration::from_millis(1000),
            retries: DEFAULT_READ_RETRIES,
            tid: 0x01,
        }
    }
}

pub struct PldmDialect {
    config: PldmConfig,
    engine: CorrelationEngine<PldmKey>,
    types: Arc<TypeTable>,
}

impl PldmDialect {
    pub fn new(config: PldmConfig) -> Self {
        let types = Arc::new(TypeTable::default());
        install_base(&types, config.tid);
        Self {
            config,
            engine: CorrelationEngine::new("pldm"),
            types,
        }
    }

    pub fn config(&self) -> &PldmConfig {
        &self.config
    }

    pub fn engine(&self) -> &CorrelationEngine<PldmKey> {
        &self.engine
    }

    /// The command table for `pldm_type`; registering here also makes the
    /// type visible to Get PLDM Types.
    pub fn commands(&self, pldm_type: u8) -> Arc<CommandTable> {
        self.types.commands(pldm_type)
    }

    pub fn supported_types(&self) -> [u8; TYPE_BITMAP_LEN] {
        self.types.supported_types()
    }

    pub fn supported_commands(&self, pldm_type: u8) -> Option<[u8; COMMAND_BITMAP_LEN]> {
        self.types.supported_commands(pldm_type)
    }

    pub fn start(&self) -> CorrelationResult<()> {
        self.engine.spawn_sweeper(self.config.sweep_interval)
    }

    pub fn shutdown(&self) -> usize {
        self.engine.shutdown()
    }

    /// Sends a request with a fresh instance id from the route's pool. The
    /// id goes back to the pool when the request completes, times out or is
    /// cancelled.
    pub fn send(
        &self,
        route: &Route,
        pldm_type: u8,
        cmd: u8,
        data: &[u8],
        on_response: impl FnOnce(Vec<u8>) + Send + 'static,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> DialectResult<RegistrationHandle<PldmKey>> {
        self.track(route, pldm_type, cmd, data, |registration| {
            registration.on_response(on_response).on_timeout(on_timeout)
        })
    }

    /// Sends a request and waits for the response, retrying up to the
    /// configured bound. Returns the data after a successful completion
    /// code.
    pub fn read(
        &self,
        route: &Route,
        pldm_type: u8,
        cmd: u8,
        data: &[u8],
    ) -> DialectResult<Vec<u8>> {
        let policy = ReadPolicy::new(self.config.timeout).with_retries(self.config.retries);
        let body = read_with_retry(policy, |slot: ReadSlot<Vec<u8>>| {
            let timed_out = slot.clone();
            let sent = self.track(route, pldm_type, cmd, data, |registration| {
                registration
                    .on_response(move |body| slot.respond(body))
                    .on_timeout(move || timed_out.timed_out())
            });
            attempt(sent)
        })?;
        match body.split_first() {
            Some((&cc::SUCCESS, rest)) => Ok(rest.to_vec()),
            Some((&code, _)) => {
                warn!(
                    "pldm type {pldm_type:#04x} cmd {cmd:#04x} to {} failed with cc {code:#04x}",
                    route.eid
                );
                Err(DialectError::Completion { code: code.into() })
            }
            None => Err(DialectError::Malformed("missing completion code")),
        }
    }

    pub fn get_tid(&self, route: &Route) -> DialectResult<u8> {
        let data = self.read(route, pldm_type::BASE, base_cmd::GET_TID, &[])?;
        data.first()
            .copied()
            .ok_or(DialectError::Malformed("missing tid"))
    }

    pub fn get_types(&self, route: &Route) -> DialectResult<[u8; TYPE_BITMAP_LEN]> {
        let data = self.read(route, pldm_type::BASE, base_cmd::GET_PLDM_TYPES, &[])?;
        data.get(..TYPE_BITMAP_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DialectError::Malformed("short type bitmap"))
    }

    /// Commands the peer supports for `ty` at any version.
    pub fn get_commands(&self, route: &Route, ty: u8) -> DialectResult<[u8; COMMAND_BITMAP_LEN]> {
        let request = [ty, 0xFF, 0xFF, 0xFF, 0xFF];
        let data = self.read(route, pldm_type::BASE, base_cmd::GET_PLDM_COMMANDS, &request)?;
        data.get(..COMMAND_BITMAP_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DialectError::Malformed("short command bitmap"))
    }

    fn track(
        &self,
        route: &Route,
        pldm_type: u8,
        cmd: u8,
        data: &[u8],
        callbacks: impl FnOnce(Registration<PldmKey, Vec<u8>>) -> Registration<PldmKey, Vec<u8>>,
    ) -> DialectResult<RegistrationHandle<PldmKey>> {
        let instance = &route.instance;
        let inst_id = instance.ids().pldm.allocate()?;
        let header = PldmHeader::request(inst_id, pldm_type, cmd);
        let mut msg = Vec::with_capacity(HEADER_LEN + data.len());
        msg.extend_from_slice(&header.encode());
        msg.extend_from_slice(data);

        let owner = instance.clone();
        let registration = callbacks(Registration::new(
            (instance.id(), inst_id, header.pldm_type, cmd),
            self.config.timeout,
        ))
        .on_release(move || {
            owner.ids().pldm.release(inst_id);
        });
        send_tracked(
            &self.engine,
            registration,
            instance,
            &msg,
            MsgParams::request(route.eid, route.to),
        )
        .inspect_err(|err| {
            // A refused registration never ran its release hook.
            if matches!(err, DialectError::Correlation(_)) {
                instance.ids().pldm.release(inst_id);
            }
        })
    }

    /// Runs the handler for an inbound request. `None` means the handler
    /// answers later, if at all.
    pub(crate) fn dispatch(&self, header: &PldmHeader, request: &Request<'_>) -> Option<Vec<u8>> {
        let Some(table) = self.types.get(header.pldm_type) else {
            warn!("pldm type {:#04x} not supported", header.pldm_type);
            return Some(vec![cc::UNSUPPORTED_CMD]);
        };
        match table.dispatch(request) {
            Ok(HandlerOutcome::Reply(body)) => Some(body),
            Ok(HandlerOutcome::Later) => None,
            Err(err) => {
                warn!(
                    "pldm type {:#04x} cmd {:#04x} from {}: {err}",
                    header.pldm_type, header.cmd, request.params.src
                );
                Some(vec![completion_code(err)])
            }
        }
    }
}

impl Dialect for PldmDialect {
    fn msg_type(&self) -> MsgType {
        MsgType::PLDM
    }

    fn name(&self) -> &'static str {
        "pldm"
    }

    fn handle_inbound(
        &self,
        instance: &InstanceHandle,
        payload: &[u8],
        params: RxParams,
    ) -> Outcome {
        let Some(header) = PldmHeader::parse(payload) else {
            return Outcome::Dropped("short pldm header");
        };
        let body = &payload[HEADER_LEN..];
        if !header.request {
            let key = (instance.id(), header.inst_id, header.pldm_type, header.cmd);
            return if self.engine.on_inbound_response(&key, body.to_vec()) {
                Outcome::Matched
            } else {
                Outcome::Unmatched
            };
        }

        debug!(
            "pldm type {:#04x} cmd {:#04x} inst {} from {}",
            header.pldm_type, header.cmd, header.inst_id, params.src
        );
        let request = Request::new(
            instance,
            params,
            header.inst_id,
            header.cmd,
            body,
            header.reply(),
        );
        let Some(reply) = self.dispatch(&header, &request) else {
            return Outcome::Deferred;
        };
        match instance.send(&request.response(&reply), params.reply()) {
            Ok(()) => Outcome::Responded,
            Err(err) => {
                warn!("pldm response to {} not sent: {err}", params.src);
                Outcome::SendFailed
            }
        }
    }
}

impl Drop for PldmDialect {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
