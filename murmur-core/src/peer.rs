// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serde::impl_hex_serde;

/// Size of peer identifiers.
pub const PEER_ID_LEN: usize = 32;

/// Identifier of a peer on the pub-sub network.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(value: [u8; PEER_ID_LEN]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = PeerIdError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();
        let checked_value: [u8; PEER_ID_LEN] = value
            .try_into()
            .map_err(|_| PeerIdError::InvalidLength(value_len, PEER_ID_LEN))?;
        Ok(Self(checked_value))
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(value)?.as_slice())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_hex()).finish()
    }
}

impl_hex_serde!(PeerId);

#[derive(Error, Debug)]
pub enum PeerIdError {
    #[error("invalid peer id length {0} bytes, expected {1} bytes")]
    InvalidLength(usize, usize),

    #[error("invalid hex encoding in peer id string")]
    InvalidHexEncoding(#[from] hex::FromHexError),
}

/// A mailserver the node can connect to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailserver {
    pub id: PeerId,

    /// Transport address used by the network layer to dial the peer.
    pub address: String,
}

impl Mailserver {
    pub fn new(id: PeerId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Shortened hex representation for log output.
pub trait ShortFormat {
    fn fmt_short(&self) -> String;
}

impl ShortFormat for PeerId {
    fn fmt_short(&self) -> String {
        self.to_hex()[0..10].to_string()
    }
}

impl ShortFormat for crate::Hash {
    fn fmt_short(&self) -> String {
        self.to_hex()[0..10].to_string()
    }
}

impl ShortFormat for crate::PublicKey {
    fn fmt_short(&self) -> String {
        // Skip the constant SEC1 prefix.
        self.to_hex()[2..12].to_string()
    }
}
