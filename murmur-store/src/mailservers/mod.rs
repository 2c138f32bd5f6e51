// SPDX-License-Identifier: MIT OR Apache-2.0

//! `MailserversStore` trait caching known mailservers and when they were last used, with
//! in-memory and SQLite implementations.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use traits::{MailserverRecord, MailserversStore};
