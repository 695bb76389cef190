//! Built-in responder commands.

use std::sync::Arc;

use log::info;

use dialect_abi::{CommandTable, DispatchError, HandlerOutcome, Request, TypeRegistry};
use transport::Eid;
use transport_fabric::RouteTable;

use crate::header::{cc, cmd};

/// EID type field of Get Endpoint ID: static EID supported.
pub const EID_TYPE_STATIC: u8 = 0x01;
/// Endpoint type field of Get Endpoint ID: bus owner or bridge.
pub const ENDPOINT_TYPE_BRIDGE: u8 = 0x01;

type HandlerResult = Result<HandlerOutcome, DispatchError>;

pub(crate) fn install(table: &CommandTable, ports: Arc<RouteTable>, types: TypeRegistry) {
    table.register(
        cmd::SET_ENDPOINT_ID,
        Arc::new(move |req: &Request<'_>| set_endpoint_id(&ports, req)),
    );
    table.register(cmd::GET_ENDPOINT_ID, Arc::new(get_endpoint_id));
    table.register(
        cmd::GET_MESSAGE_TYPE_SUPPORT,
        Arc::new(move |_: &Request<'_>| -> HandlerResult {
            let supported = types.supported();
            let mut body = Vec::with_capacity(2 + supported.len());
            body.push(cc::SUCCESS);
            body.push(supported.len() as u8);
            body.extend(supported.iter().map(|t| t.as_byte()));
            Ok(HandlerOutcome::Reply(body))
        }),
    );
}

/// `[operation, eid]`; the new EID goes to every port.
fn set_endpoint_id(ports: &RouteTable, req: &Request<'_>) -> HandlerResult {
    let [_operation, eid, ..] = *req.body else {
        return Err(DispatchError::InvalidLength);
    };
    let ports = ports.ports();
    if ports.is_empty() {
        return Ok(HandlerOutcome::Reply(vec![cc::ERROR]));
    }
    for port in &ports {
        port.set_local_eid(Eid(eid));
    }
    info!("endpoint id set to {eid:#04x} by {}", req.params.src);
    Ok(HandlerOutcome::Reply(vec![cc::SUCCESS, 0x00, eid, 0x00]))
}

fn get_endpoint_id(req: &Request<'_>) -> HandlerResult {
    if !req.body.is_empty() {
        return Err(DispatchError::InvalidLength);
    }
    Ok(HandlerOutcome::Reply(vec![
        cc::SUCCESS,
        req.instance.local_eid().0,
        (ENDPOINT_TYPE_BRIDGE << 4) | EID_TYPE_STATIC,
        0x00,
    ]))
}
