//! Time-bounded registry of peers' shared locations.
//!
//! Entries are keyed by share id and removed automatically at their expiry
//! instant. Every entry carries its own single-shot removal timer; a periodic
//! sweep backstops timers that drifted or were missed (device sleep). All
//! mutation happens under one write lock per operation, and "cancel old
//! timer, schedule new" is a single critical section, so a replaced entry's
//! stale timer can never remove its successor.

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Accepted layouts of the bus's UTC-naive expiry timestamps.
const EXPIRY_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A peer's temporarily shared coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedLocationEntry {
    pub peer_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub expires_at: DateTime<Utc>,
    pub share_id: String,
}

/// Typed in-process change feed, replacing process-wide broadcast intents.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Updated(SharedLocationEntry),
    Removed(String),
    Cleared,
}

struct EntryState {
    entry: SharedLocationEntry,
    /// Monotonic tag; a timer only removes the generation it was scheduled
    /// for, so raced removals cannot touch a replacement entry.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, EntryState>,
    watchers: Vec<UnboundedSender<RegistryEvent>>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct SharedLocationRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    display_offset: ChronoDuration,
}

impl SharedLocationRegistry {
    pub fn new(display_tz_offset_hours: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            display_offset: ChronoDuration::hours(display_tz_offset_hours),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.display_tz_offset_hours)
    }

    /// Insert or replace the entry for `share_id` and (re)schedule its
    /// removal.
    ///
    /// An existing entry is replaced, never duplicated, and its pending timer
    /// is canceled before the new one is scheduled. An expiry at or before
    /// now removes immediately: the entry is absent when this returns. A
    /// timestamp that fails to parse abandons this call only.
    pub async fn upsert(
        &self,
        peer_name: &str,
        latitude: f64,
        longitude: f64,
        expires_at_raw: &str,
        share_id: &str,
    ) -> CoreResult<()> {
        let expires_at = self.parse_expiry(expires_at_raw)?;
        let now = Utc::now();

        let mut inner = self.inner.write().await;

        let had_previous = match inner.entries.remove(share_id) {
            Some(old) => {
                if let Some(timer) = old.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        };

        if expires_at <= now {
            tracing::debug!(share_id, "shared location already expired on arrival");
            if had_previous {
                notify(&mut inner, RegistryEvent::Removed(share_id.to_string()));
            }
            return Ok(());
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let entry = SharedLocationEntry {
            peer_name: peer_name.to_string(),
            latitude,
            longitude,
            expires_at,
            share_id: share_id.to_string(),
        };

        let delay = (expires_at - now).to_std().unwrap_or_default();
        let timer = tokio::spawn(expire_after(
            Arc::clone(&self.inner),
            share_id.to_string(),
            generation,
            delay,
        ));

        tracing::debug!(share_id, peer = peer_name, expires_at = %expires_at, "shared location upserted");
        inner.entries.insert(
            share_id.to_string(),
            EntryState {
                entry: entry.clone(),
                generation,
                timer: Some(timer),
            },
        );
        notify(&mut inner, RegistryEvent::Updated(entry));
        Ok(())
    }

    /// Remove an entry and cancel its timer. Removing an absent key is a
    /// no-op.
    pub async fn remove(&self, share_id: &str) {
        let mut inner = self.inner.write().await;
        remove_entry(&mut inner, share_id, true);
    }

    /// Defensive scan removing every entry whose expiry has already passed.
    /// Safe to run concurrently with scheduled removals.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, state)| state.entry.expires_at <= now)
            .map(|(share_id, _)| share_id.clone())
            .collect();
        for share_id in expired {
            tracing::debug!(share_id = %share_id, "sweep removed expired shared location");
            remove_entry(&mut inner, &share_id, true);
        }
    }

    /// Drop all entries and cancel all pending timers.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        for (_, state) in inner.entries.drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
        notify(&mut inner, RegistryEvent::Cleared);
    }

    pub async fn get(&self, share_id: &str) -> Option<SharedLocationEntry> {
        let inner = self.inner.read().await;
        inner.entries.get(share_id).map(|state| state.entry.clone())
    }

    /// Snapshot of all live entries, for the map layer.
    pub async fn entries(&self) -> Vec<SharedLocationEntry> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .map(|state| state.entry.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register a change watcher. Dead watchers are cleaned up on send.
    pub async fn watch(&self) -> UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = unbounded_channel();
        self.inner.write().await.watchers.push(tx);
        rx
    }

    /// Run the periodic sweep until aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Expiry instant of an entry rendered in the display timezone.
    ///
    /// The only place the configured offset is applied; stored instants and
    /// timer scheduling stay in UTC.
    pub fn display_expiry(&self, entry: &SharedLocationEntry) -> NaiveDateTime {
        (entry.expires_at + self.display_offset).naive_utc()
    }

    /// Parse a UTC-naive source timestamp as the UTC expiry instant.
    fn parse_expiry(&self, raw: &str) -> CoreResult<DateTime<Utc>> {
        let naive: NaiveDateTime = EXPIRY_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .ok_or_else(|| CoreError::Timestamp(raw.to_string()))?;
        Ok(Utc.from_utc_datetime(&naive))
    }
}

/// Single-shot removal scheduled at upsert time. Re-validates the generation
/// under the write lock, so firing after a replacement is harmless.
async fn expire_after(
    inner: Arc<RwLock<RegistryInner>>,
    share_id: String,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let mut inner = inner.write().await;
    let current = inner
        .entries
        .get(&share_id)
        .is_some_and(|state| state.generation == generation);
    if current {
        tracing::debug!(share_id = %share_id, "shared location expired");
        // This timer is the entry's own; no abort needed.
        remove_entry(&mut inner, &share_id, false);
    }
}

fn remove_entry(inner: &mut RegistryInner, share_id: &str, abort_timer: bool) {
    if let Some(state) = inner.entries.remove(share_id) {
        if abort_timer {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
        notify(inner, RegistryEvent::Removed(share_id.to_string()));
    }
}

fn notify(inner: &mut RegistryInner, event: RegistryEvent) {
    inner
        .watchers
        .retain(|watcher| watcher.send(event.clone()).is_ok());
}
