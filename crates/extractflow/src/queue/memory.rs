use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::queue::{Delivery, QueueMessage, QueueSource, QueueTransport, Settlement, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryState {
    Ready { visible_at: Instant },
    Leased { by: String, expires_at: Instant },
    Dead { reason: String },
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    body: Value,
    attempts: i32,
    state: EntryState,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    entries: HashMap<Uuid, Entry>,
    published: u64,
}

/// In-process queue with the same lease/settle semantics as [`super::PgQueue`].
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("queue lock poisoned".to_string()))
    }

    /// Push a raw body, bypassing [`QueueMessage`] encoding.
    pub fn push_raw(&self, body: Value) -> Result<Uuid, TransportError> {
        let mut st = self.lock()?;
        let id = Uuid::new_v4();
        let seq = st.next_seq;
        st.next_seq += 1;
        st.published += 1;
        st.entries.insert(
            id,
            Entry {
                seq,
                body,
                attempts: 0,
                state: EntryState::Ready {
                    visible_at: Instant::now(),
                },
            },
        );
        Ok(id)
    }

    /// Total messages ever published.
    pub fn published(&self) -> u64 {
        self.lock().map(|s| s.published).unwrap_or(0)
    }

    /// Messages not yet acknowledged, dead letters included.
    pub fn pending(&self) -> usize {
        self.lock()
            .map(|s| {
                s.entries
                    .values()
                    .filter(|e| !matches!(e.state, EntryState::Dead { .. }))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<(Uuid, String)> {
        let Ok(st) = self.lock() else {
            return Vec::new();
        };
        let mut dead: Vec<(u64, Uuid, String)> = st
            .entries
            .iter()
            .filter_map(|(id, e)| match &e.state {
                EntryState::Dead { reason } => Some((e.seq, *id, reason.clone())),
                _ => None,
            })
            .collect();
        dead.sort_by_key(|(seq, _, _)| *seq);
        dead.into_iter().map(|(_, id, r)| (id, r)).collect()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), TransportError> {
        let body = serde_json::to_value(message)?;
        self.push_raw(body)?;
        Ok(())
    }
}

#[async_trait]
impl QueueSource for InMemoryQueue {
    async fn receive(
        &self,
        consumer_id: &str,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<Delivery>, TransportError> {
        let now = Instant::now();
        let mut st = self.lock()?;

        let mut ready: Vec<(u64, Uuid)> = st
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.state, EntryState::Ready { visible_at } if visible_at <= now))
            .map(|(id, e)| (e.seq, *id))
            .collect();
        ready.sort();
        ready.truncate(max);

        let mut out = Vec::with_capacity(ready.len());
        for (_, id) in ready {
            if let Some(e) = st.entries.get_mut(&id) {
                e.attempts += 1;
                e.state = EntryState::Leased {
                    by: consumer_id.to_string(),
                    expires_at: now + visibility,
                };
                out.push(Delivery {
                    id,
                    body: e.body.clone(),
                    attempts: e.attempts,
                });
            }
        }
        Ok(out)
    }

    async fn settle(
        &self,
        delivery_id: Uuid,
        consumer_id: &str,
        settlement: &Settlement,
    ) -> Result<(), TransportError> {
        let mut st = self.lock()?;

        let owned = matches!(
            st.entries.get(&delivery_id).map(|e| &e.state),
            Some(EntryState::Leased { by, .. }) if by == consumer_id
        );
        if !owned {
            return Err(TransportError::LeaseLost(delivery_id));
        }

        match settlement {
            Settlement::Ack => {
                st.entries.remove(&delivery_id);
            }
            Settlement::Retry { delay } => {
                if let Some(e) = st.entries.get_mut(&delivery_id) {
                    e.state = EntryState::Ready {
                        visible_at: Instant::now() + *delay,
                    };
                }
            }
            Settlement::DeadLetter { reason } => {
                if let Some(e) = st.entries.get_mut(&delivery_id) {
                    e.state = EntryState::Dead {
                        reason: reason.clone(),
                    };
                }
            }
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64, TransportError> {
        let now = Instant::now();
        let mut st = self.lock()?;
        let mut n = 0;
        for e in st.entries.values_mut() {
            if matches!(e.state, EntryState::Leased { expires_at, .. } if expires_at <= now) {
                e.state = EntryState::Ready { visible_at: now };
                n += 1;
            }
        }
        Ok(n)
    }
}
