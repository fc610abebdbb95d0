use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, parse_datetime},
    models::Message,
};
use crate::topic::{is_wildcard, topic_matches};

fn row_to_message(row: &Row) -> Result<Message, rusqlite::Error> {
    let received_at: String = row.get("received_at")?;
    let payload: Option<String> = row.get("payload")?;
    let is_processed: i64 = row.get("is_processed")?;

    Ok(Message {
        id: row.get("id")?,
        topic: row.get("topic")?,
        payload: payload.unwrap_or_default(),
        received_at: parse_datetime(&received_at, "received_at").map_err(conversion_error)?,
        processed: is_processed != 0,
    })
}

impl Database {
    /// Store a received message verbatim. The row is committed before this returns.
    pub async fn append_message(
        &self,
        topic: &str,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<i64> {
        let topic = topic.to_string();
        let payload = payload.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO mqtt_messages (topic, payload, received_at)
                 VALUES (?1, ?2, ?3)",
                params![topic, payload, format_datetime(&received_at)],
            )
            .with_context(|| format!("failed to append message on {topic}"))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Unprocessed messages whose topic matches the MQTT filter, oldest first.
    pub async fn fetch_unprocessed(&self, topic_filter: &str) -> Result<Vec<Message>> {
        let topic_filter = topic_filter.to_string();
        self.execute(move |conn| {
            let messages = if is_wildcard(&topic_filter) {
                let mut stmt = conn.prepare(
                    "SELECT id, topic, payload, received_at, is_processed
                     FROM mqtt_messages
                     WHERE is_processed = 0
                     ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map([], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .filter(|message| topic_matches(&topic_filter, &message.topic))
                    .collect()
            } else {
                let mut stmt = conn.prepare(
                    "SELECT id, topic, payload, received_at, is_processed
                     FROM mqtt_messages
                     WHERE is_processed = 0 AND topic = ?1
                     ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![topic_filter], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            Ok(messages)
        })
        .await
    }

    /// Flag the given rows as consumed. Unknown ids are ignored.
    pub async fn mark_processed(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids = ids.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let updated = mark_ids(&tx, &ids)?;
            tx.commit().context("failed to commit processed flags")?;
            Ok(updated)
        })
        .await
    }

    pub async fn count_messages(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM mqtt_messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

/// Flip `is_processed` inside a caller-owned transaction.
pub(crate) fn mark_ids(tx: &rusqlite::Transaction<'_>, ids: &[i64]) -> Result<usize> {
    let mut stmt =
        tx.prepare_cached("UPDATE mqtt_messages SET is_processed = 1 WHERE id = ?1")?;
    let mut updated = 0;
    for id in ids {
        updated += stmt
            .execute(params![id])
            .with_context(|| format!("failed to mark message {id} processed"))?;
    }
    Ok(updated)
}
