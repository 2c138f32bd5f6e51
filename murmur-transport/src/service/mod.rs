// SPDX-License-Identifier: MIT OR Apache-2.0

//! Joining and leaving chats, sending and retrieving messages and requesting historic messages
//! from mailservers.
mod api;
mod builder;

pub(crate) use api::Inner;
pub use api::{MailserverRequestError, TransportError, TransportService};
pub use builder::Builder;
