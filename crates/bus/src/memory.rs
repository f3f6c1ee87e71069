//! In-process bus backend.
//!
//! A mutex-guarded map from topic to an ordered entry log, with a
//! [`tokio::sync::Notify`] signaled on publish so `block_ms` readers
//! suspend instead of spinning. Used for single-process mode and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use hivebus_core::error::BusError;

use crate::{Bus, BusEntry, BusMessage, GroupIdentity};

const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(30);

/// Pure-memory bus. Cloning yields another handle over the same store, so a
/// tail-mode gateway handle and a group-mode worker handle can share one
/// process-local log.
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<Shared>,
    group: Option<GroupIdentity>,
    claim_timeout: Duration,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, TopicLog>,
    /// Keyed by (topic, group name).
    groups: HashMap<(String, String), GroupState>,
}

#[derive(Default)]
struct TopicLog {
    /// Append-only; sequence numbers start at 1 and never repeat.
    entries: Vec<(u64, BusMessage)>,
    next_seq: u64,
}

impl TopicLog {
    fn append(&mut self, message: BusMessage) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.push((seq, message));
        seq
    }

    fn get_by_seq(&self, seq: u64) -> Option<&BusMessage> {
        self.entries
            .binary_search_by_key(&seq, |(s, _)| *s)
            .ok()
            .map(|i| &self.entries[i].1)
    }
}

#[derive(Default)]
struct GroupState {
    /// Index into the topic's entry vec of the next never-delivered entry.
    next_index: usize,
    /// Delivered-but-unacked entries and when they were last handed out.
    pending: HashMap<u64, Instant>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
            }),
            group: None,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    /// Switch this handle into consumer-group mode.
    pub fn with_group(mut self, group: GroupIdentity) -> Self {
        self.group = Some(group);
        self
    }

    /// Tune how long an unacked delivery stays claimed before it becomes
    /// eligible for redelivery. Test hook.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    fn format_cursor(seq: u64) -> String {
        format!("{seq:020}")
    }

    fn parse_cursor(cursor: &str) -> Result<u64, BusError> {
        cursor
            .parse::<u64>()
            .map_err(|_| BusError::InvalidCursor(cursor.to_string()))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn read_tail(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BusEntry>, BusError> {
        let Some(log) = self.topics.get(topic) else {
            return Ok(Vec::new());
        };

        let entries: Vec<&(u64, BusMessage)> = match last_cursor {
            // Tail: the most recent `limit` entries in chronological order.
            None => log.entries.iter().rev().take(limit).rev().collect(),
            Some(cursor) => {
                let after = MemoryBus::parse_cursor(cursor)?;
                log.entries
                    .iter()
                    .filter(|(seq, _)| *seq > after)
                    .take(limit)
                    .collect()
            }
        };

        Ok(entries
            .into_iter()
            .map(|(seq, message)| BusEntry {
                cursor: MemoryBus::format_cursor(*seq),
                message: message.clone(),
            })
            .collect())
    }

    fn read_group(
        &mut self,
        topic: &str,
        group: &GroupIdentity,
        limit: usize,
        claim_timeout: Duration,
    ) -> Vec<BusEntry> {
        let Some(log) = self.topics.get(topic) else {
            return Vec::new();
        };
        let state = self
            .groups
            .entry((topic.to_string(), group.group.clone()))
            .or_default();

        let now = Instant::now();
        let mut out = Vec::new();

        // Claim-expired deliveries first, oldest sequence first.
        let mut expired: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, delivered_at)| now.duration_since(**delivered_at) >= claim_timeout)
            .map(|(seq, _)| *seq)
            .collect();
        expired.sort_unstable();
        for seq in expired {
            if out.len() >= limit {
                break;
            }
            if let Some(message) = log.get_by_seq(seq) {
                state.pending.insert(seq, now);
                out.push(BusEntry {
                    cursor: MemoryBus::format_cursor(seq),
                    message: message.clone(),
                });
            }
        }

        // Then entries never delivered to this group.
        while out.len() < limit {
            let Some((seq, message)) = log.entries.get(state.next_index) else {
                break;
            };
            state.next_index += 1;
            state.pending.insert(*seq, now);
            out.push(BusEntry {
                cursor: MemoryBus::format_cursor(*seq),
                message: message.clone(),
            });
        }

        out
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError> {
        let seq = {
            let mut inner = self
                .shared
                .inner
                .lock()
                .map_err(|_| BusError::Unavailable("bus state poisoned".into()))?;
            inner.topics.entry(topic.to_string()).or_default().append(message)
        };
        self.shared.notify.notify_waiters();
        Ok(Self::format_cursor(seq))
    }

    async fn read(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError> {
        let deadline = (block_ms > 0).then(|| Instant::now() + Duration::from_millis(block_ms));

        loop {
            // Register for wakeups before checking state so a publish racing
            // with the check is never missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = {
                let mut inner = self
                    .shared
                    .inner
                    .lock()
                    .map_err(|_| BusError::Unavailable("bus state poisoned".into()))?;
                match &self.group {
                    Some(group) => inner.read_group(topic, group, limit, self.claim_timeout),
                    None => inner.read_tail(topic, last_cursor, limit)?,
                }
            };

            if !batch.is_empty() {
                return Ok(batch);
            }
            let Some(deadline) = deadline else {
                return Ok(Vec::new());
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, topic: &str, cursor: &str) -> Result<(), BusError> {
        let Some(group) = &self.group else {
            return Ok(()); // no-op outside groups
        };
        let seq = Self::parse_cursor(cursor)?;
        let mut inner = self
            .shared
            .inner
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".into()))?;
        if let Some(state) = inner
            .groups
            .get_mut(&(topic.to_string(), group.group.clone()))
        {
            state.pending.remove(&seq);
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), BusError> {
        Ok(())
    }

    fn earliest_cursor(&self) -> &'static str {
        "0"
    }
}
