// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use murmur_core::SymmetricKey;
use sqlx::{query, query_as};

use crate::keys::KeysStore;
use crate::sqlite::{SqliteError, SqliteStore};

impl KeysStore for SqliteStore {
    type Error = SqliteError;

    async fn all_keys(&self) -> Result<HashMap<String, SymmetricKey>, SqliteError> {
        let rows = query_as::<_, (String, Vec<u8>)>(
            "
            SELECT
                chat_id,
                key
            FROM
                symmetric_keys_v1
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result = HashMap::with_capacity(rows.len());
        for (chat_id, key) in rows {
            let key = SymmetricKey::try_from(key.as_slice())
                .map_err(|err| SqliteError::Decode("key".into(), err.into()))?;
            result.insert(chat_id, key);
        }

        Ok(result)
    }

    async fn add_key(&self, chat_id: &str, key: &SymmetricKey) -> Result<bool, SqliteError> {
        let result = query(
            "
            INSERT OR IGNORE
            INTO
                symmetric_keys_v1 (
                    chat_id,
                    key
                )
            VALUES
                (?, ?)
            ",
        )
        .bind(chat_id)
        .bind(key.as_bytes().to_vec())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
