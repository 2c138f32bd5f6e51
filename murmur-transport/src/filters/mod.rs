// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscriptions of chats on the network layer.
//!
//! Every kind of chat maps to a topic and a key in its own way: public chats and contact codes use
//! symmetric keys derived from their chat id, partitioned and discovery topics are decrypted with
//! the local identity and negotiated chats use a key derived from a pairwise secret.
mod filter;
mod manager;
#[cfg(test)]
mod tests;

pub use filter::{Filter, NegotiatedSecret};
pub(crate) use filter::RawFilter;
pub use manager::{FilterError, FiltersManager};
