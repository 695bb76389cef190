//! Receive-side service seam and submit outcomes for transport-fabric.

use transport::{Eid, MediumAddress, MsgTag};

use crate::instance::InstanceHandle;

/// Addressing for an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgParams {
    pub dest: Eid,
    /// Medium-level address of the next hop.
    pub to: MediumAddress,
    /// Set for requests; the outbound worker then allocates the tag.
    pub tag_owner: bool,
    /// Echoed for responses, ignored for requests.
    pub tag: MsgTag,
}

impl MsgParams {
    pub fn request(dest: Eid, to: MediumAddress) -> Self {
        Self {
            dest,
            to,
            tag_owner: true,
            tag: MsgTag::new(0),
        }
    }
}

/// Origin of a reassembled inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxParams {
    pub src: Eid,
    pub tag: MsgTag,
    /// Tag-owner flag as sent by the peer; set on requests.
    pub tag_owner: bool,
    pub from: MediumAddress,
}

impl RxParams {
    pub fn is_request(&self) -> bool {
        self.tag_owner
    }

    /// Parameters for answering this message: same peer, echoed tag, tag
    /// owner cleared.
    pub fn reply(&self) -> MsgParams {
        MsgParams {
            dest: self.src,
            to: self.from,
            tag_owner: false,
            tag: self.tag,
        }
    }
}

/// Receives every message addressed to the instance (or to the null EID).
///
/// Runs on the instance's inbound worker. Implementations must not wait on a
/// response that the same worker would have to deliver.
pub trait RxHandler: Send + Sync {
    fn on_message(&self, instance: &InstanceHandle, payload: &[u8], params: RxParams);
}

impl<F> RxHandler for F
where
    F: Fn(&InstanceHandle, &[u8], RxParams) + Send + Sync,
{
    fn on_message(&self, instance: &InstanceHandle, payload: &[u8], params: RxParams) {
        self(instance, payload, params)
    }
}

/// Outcome returned when attempting to place work on an outbound port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Request entered the queue.
    Accepted,
    /// Queue is full; nothing was enqueued.
    WouldBlock,
    /// The outbound worker is gone.
    Closed,
}
