// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use murmur_core::{Mailserver, PeerId};
use sqlx::{query, query_as};

use crate::mailservers::{MailserverRecord, MailserversStore};
use crate::sqlite::{SqliteError, SqliteStore};

fn decode_record(
    (peer_id, address, last_used): (String, String, i64),
) -> Result<MailserverRecord, SqliteError> {
    let id: PeerId = peer_id
        .parse()
        .map_err(|err: murmur_core::PeerIdError| SqliteError::Decode("peer_id".into(), err.into()))?;

    Ok(MailserverRecord {
        id,
        address,
        last_used: u64::try_from(last_used).unwrap_or_default(),
    })
}

fn encode_timestamp(timestamp: u64) -> i64 {
    i64::try_from(timestamp).unwrap_or(i64::MAX)
}

impl MailserversStore for SqliteStore {
    type Error = SqliteError;

    async fn replace_mailservers(&self, nodes: &[Mailserver]) -> Result<(), SqliteError> {
        let mut tx = self.pool.begin().await?;

        let existing: HashMap<String, i64> =
            query_as::<_, (String, i64)>("SELECT peer_id, last_used FROM mailservers_v1")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        query("DELETE FROM mailservers_v1").execute(&mut *tx).await?;

        for node in nodes {
            let peer_id = node.id.to_hex();
            let last_used = existing.get(&peer_id).copied().unwrap_or_default();
            query(
                "
                INSERT OR REPLACE
                INTO
                    mailservers_v1 (
                        peer_id,
                        address,
                        last_used
                    )
                VALUES
                    (?, ?, ?)
                ",
            )
            .bind(peer_id)
            .bind(&node.address)
            .bind(last_used)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn all_mailservers(&self) -> Result<Vec<MailserverRecord>, SqliteError> {
        let rows = query_as::<_, (String, String, i64)>(
            "
            SELECT
                peer_id,
                address,
                last_used
            FROM
                mailservers_v1
            ORDER BY
                peer_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_record).collect()
    }

    async fn update_mailserver(&self, record: MailserverRecord) -> Result<(), SqliteError> {
        query(
            "
            INSERT OR REPLACE
            INTO
                mailservers_v1 (
                    peer_id,
                    address,
                    last_used
                )
            VALUES
                (?, ?, ?)
            ",
        )
        .bind(record.id.to_hex())
        .bind(record.address)
        .bind(encode_timestamp(record.last_used))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
