use std::time::Duration;

use log::{info, warn};

use correlation::{
    read_with_retry, CorrelationEngine, CorrelationResult, ReadPolicy, ReadSlot, Registration,
    RegistrationHandle, DEFAULT_READ_RETRIES,
};
use dialect_abi::{attempt, send_tracked, Dialect, DialectError, DialectResult, Outcome};
use transport::{MsgType, ASSEMBLY_LIMIT};
use transport_fabric::{InstanceHandle, InstanceId, MsgParams, Route, RxParams};

use crate::header::{NcsiHeader, NcsiResponse, HEADER_LEN, MAX_PAYLOAD};

/// Instance, instance id and command (response bit cleared).
pub type NcsiKey = (InstanceId, u8, u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NcsiConfig {
    pub timeout: Duration,
    pub sweep_interval: Duration,
    pub retries: u32,
}

impl Default for NcsiConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(6000),
            sweep_interval: Duration::from_millis(1000),
            retries: DEFAULT_READ_RETRIES,
        }
    }
}

/// Requester-only sideband dialect: inbound requests are logged and
/// dropped.
pub struct NcsiDialect {
    config: NcsiConfig,
    engine: CorrelationEngine<NcsiKey>,
}

impl NcsiDialect {
    pub fn new(config: NcsiConfig) -> Self {
        Self {
            config,
            engine: CorrelationEngine::new("ncsi"),
        }
    }

    pub fn config(&self) -> &NcsiConfig {
        &self.config
    }

    pub fn engine(&self) -> &CorrelationEngine<NcsiKey> {
        &self.engine
    }

    pub fn start(&self) -> CorrelationResult<()> {
        self.engine.spawn_sweeper(self.config.sweep_interval)
    }

    pub fn shutdown(&self) -> usize {
        self.engine.shutdown()
    }

    /// Sends `command` on `channel`; `on_response` receives the response
    /// payload after the header.
    pub fn send(
        &self,
        route: &Route,
        channel: u8,
        command: u8,
        data: &[u8],
        on_response: impl FnOnce(Vec<u8>) + Send + 'static,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> DialectResult<RegistrationHandle<NcsiKey>> {
        self.track(route, channel, command, data, |registration| {
            registration.on_response(on_response).on_timeout(on_timeout)
        })
    }

    /// Sends `command` and waits for its response payload, retrying up to
    /// the configured bound.
    pub fn read(
        &self,
        route: &Route,
        channel: u8,
        command: u8,
        data: &[u8],
    ) -> DialectResult<Vec<u8>> {
        let policy = ReadPolicy::new(self.config.timeout).with_retries(self.config.retries);
        let payload = read_with_retry(policy, |slot: ReadSlot<Vec<u8>>| {
            let timed_out = slot.clone();
            let sent = self.track(route, channel, command, data, |registration| {
                registration
                    .on_response(move |payload| slot.respond(payload))
                    .on_timeout(move || timed_out.timed_out())
            });
            attempt(sent)
        })?;
        Ok(payload)
    }

    /// [`read`](Self::read) plus response code check.
    pub fn command(
        &self,
        route: &Route,
        channel: u8,
        command: u8,
        data: &[u8],
    ) -> DialectResult<NcsiResponse> {
        let payload = self.read(route, channel, command, data)?;
        let response =
            NcsiResponse::parse(&payload).ok_or(DialectError::Malformed("short ncsi response"))?;
        if response.response_code != 0 {
            warn!(
                "ncsi command {command:#04x} on channel {channel:#04x}: \
                 response {:#06x} reason {:#06x}",
                response.response_code,
                response.reason_code
            );
            return Err(DialectError::Completion {
                code: response.response_code,
            });
        }
        Ok(response)
    }

    fn track(
        &self,
        route: &Route,
        channel: u8,
        command: u8,
        data: &[u8],
        callbacks: impl FnOnce(Registration<NcsiKey, Vec<u8>>) -> Registration<NcsiKey, Vec<u8>>,
    ) -> DialectResult<RegistrationHandle<NcsiKey>> {
        if data.len() > MAX_PAYLOAD {
            return Err(DialectError::Malformed("payload exceeds the 12-bit length field"));
        }
        if HEADER_LEN + data.len() > ASSEMBLY_LIMIT {
            return Err(DialectError::Malformed("ncsi request exceeds the message limit"));
        }
        let instance = &route.instance;
        let iid = instance.ids().ncsi.allocate()?;
        let header = NcsiHeader::request(iid, command, channel, data.len() as u16);
        let mut msg = Vec::with_capacity(HEADER_LEN + data.len());
        msg.extend_from_slice(&header.encode());
        msg.extend_from_slice(data);

        let owner = instance.clone();
        let registration = callbacks(Registration::new(
            (instance.id(), iid, header.command),
            self.config.timeout,
        ))
        .on_release(move || {
            owner.ids().ncsi.release(iid);
        });
        send_tracked(
            &self.engine,
            registration,
            instance,
            &msg,
            MsgParams::request(route.eid, route.to),
        )
        .inspect_err(|err| {
            if matches!(err, DialectError::Correlation(_)) {
                instance.ids().ncsi.release(iid);
            }
        })
    }
}

impl Dialect for NcsiDialect {
    fn msg_type(&self) -> MsgType {
        MsgType::NCSI
    }

    fn name(&self) -> &'static str {
        "ncsi"
    }

    fn handle_inbound(
        &self,
        instance: &InstanceHandle,
        payload: &[u8],
        params: RxParams,
    ) -> Outcome {
        let Some(header) = NcsiHeader::parse(payload) else {
            return Outcome::Dropped("short ncsi header");
        };
        if !header.response {
            info!(
                "{}: ncsi request {:#04x} from {} not served",
                instance.name(),
                header.command,
                params.src
            );
            return Outcome::Dropped("ncsi requests are not served");
        }
        let body = &payload[HEADER_LEN..];
        let len = body.len().min(usize::from(header.payload_len));
        let key = (instance.id(), header.iid, header.command);
        if self.engine.on_inbound_response(&key, body[..len].to_vec()) {
            Outcome::Matched
        } else {
            Outcome::Unmatched
        }
    }
}

impl Drop for NcsiDialect {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
