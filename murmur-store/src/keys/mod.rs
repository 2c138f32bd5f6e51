// SPDX-License-Identifier: MIT OR Apache-2.0

//! `KeysStore` trait persisting symmetric filter keys by chat identifier, with in-memory and
//! SQLite implementations.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use traits::KeysStore;
