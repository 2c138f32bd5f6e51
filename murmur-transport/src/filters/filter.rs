// SPDX-License-Identifier: MIT OR Apache-2.0

use murmur_core::{PublicKey, Topic};
use serde::{Deserialize, Serialize};

/// Subscription of a chat on the network layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Identifier of the chat, unique among all active filters.
    pub chat_id: String,

    /// Id of the subscription on the network layer.
    pub filter_id: String,

    pub topic: Topic,

    /// Id of the symmetric key on the network layer, `None` for asymmetric filters.
    pub sym_key_id: Option<String>,

    /// Hex encoded public key of the identity this filter belongs to.
    pub identity: Option<String>,

    /// Messages are encrypted for a single recipient.
    pub one_to_one: bool,

    pub discovery: bool,

    /// Derived from a secret negotiated with the identity.
    pub negotiated: bool,

    /// Incoming messages are processed. Filters which don't listen only exist so we can publish on
    /// their topic.
    pub listen: bool,
}

impl Filter {
    pub(crate) fn new(chat_id: impl Into<String>, raw: RawFilter) -> Self {
        Self {
            chat_id: chat_id.into(),
            filter_id: raw.filter_id,
            topic: raw.topic,
            sym_key_id: raw.sym_key_id,
            identity: None,
            one_to_one: false,
            discovery: false,
            negotiated: false,
            listen: true,
        }
    }

    pub(crate) fn identity(mut self, public_key: &PublicKey) -> Self {
        self.identity = Some(public_key.to_hex());
        self
    }

    pub(crate) fn one_to_one(mut self) -> Self {
        self.one_to_one = true;
        self
    }

    pub(crate) fn discovery(mut self) -> Self {
        self.discovery = true;
        self
    }

    pub(crate) fn negotiated(mut self) -> Self {
        self.negotiated = true;
        self
    }

    pub(crate) fn listen(mut self, listen: bool) -> Self {
        self.listen = listen;
        self
    }

    /// Returns `true` if the filter belongs to the given identity.
    pub fn is_identity(&self, public_key: &PublicKey) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| *identity == public_key.to_hex())
    }
}

/// Subscription as returned by the network layer, before it is bound to a chat.
#[derive(Clone, Debug)]
pub(crate) struct RawFilter {
    pub filter_id: String,
    pub topic: Topic,
    pub sym_key_id: Option<String>,
}

/// Pairwise secret agreed on with another identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedSecret {
    /// Identity the secret was negotiated with.
    pub public_key: PublicKey,

    pub key: Vec<u8>,
}

impl NegotiatedSecret {
    pub fn new(public_key: PublicKey, key: impl Into<Vec<u8>>) -> Self {
        Self {
            public_key,
            key: key.into(),
        }
    }
}
