// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::request::MailServerResponse;
use crate::{Hash, PeerId};

/// Things that happened to envelopes and mailserver requests on the network layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeEventType {
    /// Envelope was handed to at least one peer.
    EnvelopeSent,

    /// Envelope expired before anybody received it.
    EnvelopeExpired,

    /// Historic message request was sent to a mailserver.
    MailServerRequestSent,

    /// Mailserver finished delivering a page of envelopes.
    MailServerRequestCompleted(MailServerResponse),

    /// Mailserver didn't answer the request in time.
    MailServerRequestExpired,
}

/// Event emitted by the network layer about an envelope or mailserver request.
///
/// For mailserver events `hash` is the identifier of the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeEvent {
    pub event: EnvelopeEventType,
    pub hash: Hash,
    pub peer: PeerId,
}

impl EnvelopeEvent {
    pub fn new(event: EnvelopeEventType, hash: Hash, peer: PeerId) -> Self {
        Self { event, hash, peer }
    }
}

/// Connection changes of peers on the network layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerEvent {
    Added(PeerId),
    Dropped(PeerId),
}
