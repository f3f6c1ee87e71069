//! Redis Streams bus backend.
//!
//! - `publish` — `XADD` to the stream named by the topic; each entry stores
//!   exactly two fields, `id` (canonical uuid) and `payload` (JSON string).
//! - `read` (tail) — `XREVRANGE`/`XRANGE` scans, with `XREAD BLOCK` for
//!   blocking waits.
//! - `read` (group) — `XREADGROUP` with safe group creation; entries stay
//!   pending until the caller calls `ack` (`XACK`).
//!
//! The adapter does not retry internally: `publish` fails fast and read
//! errors surface to the caller, who owns the retry policy.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::warn;

use hivebus_core::error::BusError;

use crate::{Bus, BusEntry, BusMessage, GroupIdentity};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis Streams-backed bus.
pub struct RedisBus {
    conn: ConnectionManager,
    group: Option<GroupIdentity>,
    /// Topics whose consumer group has already been created this process.
    ensured_groups: Mutex<HashSet<String>>,
}

impl RedisBus {
    /// Connect to a Redis endpoint. Applies a bounded connect timeout; read
    /// operations themselves carry no timeout (caller-level deadlines apply).
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)
            .map_err(|e| BusError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| BusError::Unavailable("redis connect timed out".into()))?
            .map_err(to_bus_error)?;
        Ok(Self {
            conn,
            group: None,
            ensured_groups: Mutex::new(HashSet::new()),
        })
    }

    /// Switch this bus into consumer-group mode.
    pub fn with_group(mut self, group: GroupIdentity) -> Self {
        self.group = Some(group);
        self
    }

    /// Create the consumer group at stream origin (`0`, `MKSTREAM`) so
    /// pre-existing entries are delivered. BUSYGROUP means someone else
    /// created it first, which is fine.
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), BusError> {
        {
            let ensured = self
                .ensured_groups
                .lock()
                .map_err(|_| BusError::Unavailable("bus state poisoned".into()))?;
            if ensured.contains(topic) {
                return Ok(());
            }
        }

        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(topic, group, "0").await;
        match created {
            Ok(_) => {}
            Err(e) if e.to_string().contains("BUSYGROUP") => {}
            Err(e) => return Err(to_bus_error(e)),
        }

        self.ensured_groups
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".into()))?
            .insert(topic.to_string());
        Ok(())
    }

    async fn read_tail(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError> {
        let mut conn = self.conn.clone();

        let entries = match last_cursor {
            // Tail: the most recent `limit` entries in chronological order.
            None => {
                let reply: StreamRangeReply = conn
                    .xrevrange_count(topic, "+", "-", limit)
                    .await
                    .map_err(to_bus_error)?;
                let mut ids = reply.ids;
                ids.reverse();
                ids
            }
            // Strictly-after scan via an exclusive range start.
            Some(cursor) => {
                let start = format!("({cursor}");
                let reply: StreamRangeReply = conn
                    .xrange_count(topic, start, "+", limit)
                    .await
                    .map_err(to_bus_error)?;
                reply.ids
            }
        };

        if !entries.is_empty() || block_ms == 0 {
            return Ok(entries.iter().map(entry_from_stream_id).collect());
        }

        // Nothing buffered: block on XREAD for new entries. `$` means "only
        // entries appended after this call" which matches tail semantics.
        let from_id = last_cursor.unwrap_or("$").to_string();
        let options = StreamReadOptions::default()
            .block(block_ms as usize)
            .count(limit);
        let reply: StreamReadReply = conn
            .xread_options(&[topic], &[from_id.as_str()], &options)
            .await
            .map_err(to_bus_error)?;

        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(entry_from_stream_id)
            .collect())
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &GroupIdentity,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError> {
        self.ensure_group(topic, &group.group).await?;

        let mut options = StreamReadOptions::default()
            .group(&group.group, &group.consumer)
            .count(limit);
        if block_ms > 0 {
            options = options.block(block_ms as usize);
        }

        let mut conn = self.conn.clone();
        let reply: StreamReadReply = conn
            .xread_options(&[topic], &[">"], &options)
            .await
            .map_err(to_bus_error)?;

        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(entry_from_stream_id)
            .collect())
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError> {
        let payload = serde_json::to_string(&message.payload)
            .map_err(|e| BusError::Unavailable(format!("payload encode failed: {e}")))?;

        let mut conn = self.conn.clone();
        let cursor: String = conn
            .xadd(
                topic,
                "*",
                &[("id", message.id.as_str()), ("payload", payload.as_str())],
            )
            .await
            .map_err(to_bus_error)?;
        Ok(cursor)
    }

    async fn read(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError> {
        match &self.group {
            Some(group) => self.read_group(topic, group, limit, block_ms).await,
            None => self.read_tail(topic, last_cursor, limit, block_ms).await,
        }
    }

    async fn ack(&self, topic: &str, cursor: &str) -> Result<(), BusError> {
        let Some(group) = &self.group else {
            return Ok(()); // no-op outside groups
        };
        let mut conn = self.conn.clone();
        let _acked: u64 = conn
            .xack(topic, &group.group, &[cursor])
            .await
            .map_err(to_bus_error)?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(to_bus_error)?;
        Ok(())
    }

    fn earliest_cursor(&self) -> &'static str {
        "0-0"
    }
}

fn to_bus_error(e: redis::RedisError) -> BusError {
    let text = e.to_string();
    if text.contains("Invalid stream ID") {
        BusError::InvalidCursor(text)
    } else {
        BusError::Unavailable(text)
    }
}

fn entry_from_stream_id(sid: &StreamId) -> BusEntry {
    let canonical: Option<String> = sid.get("id");
    let payload_raw: Option<String> = sid.get("payload");
    entry_from_parts(&sid.id, canonical, payload_raw)
}

/// Build a [`BusEntry`] from the raw pieces of a stream entry.
///
/// A malformed payload yields an empty object rather than a dropped read;
/// the subscriber logs and skips it (protocol errors never crash readers).
/// A missing canonical id falls back to the entry id so dedup still has a
/// stable key.
fn entry_from_parts(cursor: &str, canonical: Option<String>, payload_raw: Option<String>) -> BusEntry {
    let payload = match payload_raw.as_deref() {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(cursor = %cursor, error = %e, "malformed bus payload, substituting empty object");
            serde_json::Value::Object(serde_json::Map::new())
        }),
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    BusEntry {
        cursor: cursor.to_string(),
        message: BusMessage {
            id: canonical.unwrap_or_else(|| cursor.to_string()),
            payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keeps_canonical_id_and_payload() {
        let entry = entry_from_parts(
            "1700000000000-0",
            Some("uuid-1".into()),
            Some(r#"{"event":"token","text":"x"}"#.into()),
        );
        assert_eq!(entry.cursor, "1700000000000-0");
        assert_eq!(entry.message.id, "uuid-1");
        assert_eq!(entry.message.payload["event"], "token");
    }

    #[test]
    fn malformed_payload_becomes_empty_object() {
        let entry = entry_from_parts("1-0", Some("uuid-2".into()), Some("{not json".into()));
        assert!(entry.message.payload.as_object().unwrap().is_empty());
    }

    #[test]
    fn missing_canonical_id_falls_back_to_entry_id() {
        let entry = entry_from_parts("42-1", None, Some("{}".into()));
        assert_eq!(entry.message.id, "42-1");
    }
}
