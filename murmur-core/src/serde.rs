// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hex-or-bytes `serde` helpers shared by the fixed-size byte types of this crate.
use serde::Deserialize;
use serde::Serialize;
use serde_bytes::{ByteBuf as SerdeByteBuf, Bytes as SerdeBytes};

/// Serialize bytes into a hex string for human readable encodings (JSON), otherwise write the
/// bytes directly.
pub fn serialize_hex<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if serializer.is_human_readable() {
        hex::serde::serialize(value, serializer)
    } else {
        SerdeBytes::new(value).serialize(serializer)
    }
}

/// Deserialize bytes from a hex string for human readable encodings (JSON), otherwise read the
/// bytes directly.
pub fn deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        hex::serde::deserialize(deserializer)
    } else {
        let bytes = <SerdeByteBuf>::deserialize(deserializer)?;
        Ok(bytes.to_vec())
    }
}

/// Implements `Serialize` and `Deserialize` for a byte newtype through the hex helpers above.
///
/// The type needs `as_bytes()` and a `TryFrom<&[u8]>` implementation with a displayable error.
macro_rules! impl_hex_serde {
    ($type:ty) => {
        impl ::serde::Serialize for $type {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                $crate::serde::serialize_hex(self.as_bytes(), serializer)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let bytes = $crate::serde::deserialize_hex(deserializer)?;
                <$type>::try_from(bytes.as_slice())
                    .map_err(|err| ::serde::de::Error::custom(err.to_string()))
            }
        }
    };
}

pub(crate) use impl_hex_serde;
