//! Message cache with TTL and single-flight generation.
//!
//! ## Request coalescing
//!
//! When several partitions ask for the message of the same key at the same
//! time, only the first caller (the leader) runs the generator. Everyone else
//! subscribes to the leader's broadcast channel and receives the same text.
//!
//! ## Failure handling
//!
//! Generation failures and timeouts never surface as errors: the leader clears
//! its in-flight marker and every caller receives the fallback text. A leader
//! whose future is dropped mid-generation clears the marker from `Drop`, so
//! later callers can try again.

mod sweeper;

pub use sweeper::run_sweeper;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Stable key over (entity, POI, personalization context).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(entity_id: &str, poi_id: u64, context_fingerprint: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(entity_id.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(&poi_id.to_le_bytes());
        hasher.update(&[0x1f]);
        hasher.update(context_fingerprint.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a resolved message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// Live cache entry
    Cached,
    /// This caller ran the generator
    Generated,
    /// Waited on another caller's generation
    Coalesced,
    /// Generation failed or timed out
    Fallback,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub source: MessageSource,
}

enum Slot {
    Ready {
        text: String,
        created_at: Instant,
    },
    InFlight {
        tx: broadcast::Sender<Option<String>>,
        started_at: Instant,
    },
}

enum Claim {
    Hit(String),
    Wait(broadcast::Receiver<Option<String>>),
    Lead(broadcast::Sender<Option<String>>),
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
    pub generation_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            max_entries: 10_000,
            generation_timeout: Duration::from_secs(10),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub fallbacks: u64,
    pub size: usize,
    pub in_flight: usize,
}

pub struct MessageCache {
    entries: DashMap<CacheKey, Slot>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fallbacks: AtomicU64,
}

impl MessageCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Resolve the message for `key`, generating it at most once concurrently.
    ///
    /// `fallback` is only evaluated when generation fails, times out, or the
    /// leader goes away. The result is never an error.
    pub async fn get_or_generate<F, Fut, E>(
        &self,
        key: &CacheKey,
        fallback: impl FnOnce() -> String,
        generate: F,
    ) -> Resolved
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Display,
    {
        match self.claim(key) {
            Claim::Hit(text) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Resolved {
                    text,
                    source: MessageSource::Cached,
                }
            }
            Claim::Wait(mut rx) => {
                match timeout(self.settings.generation_timeout, rx.recv()).await {
                    Ok(Ok(Some(text))) => {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        Resolved {
                            text,
                            source: MessageSource::Coalesced,
                        }
                    }
                    _ => {
                        debug!(key = %key, "Coalesced wait ended without a message");
                        self.fallback(fallback)
                    }
                }
            }
            Claim::Lead(tx) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let guard = InFlightGuard {
                    cache: self,
                    key: key.clone(),
                    tx,
                    done: false,
                };

                let outcome = match timeout(self.settings.generation_timeout, generate()).await {
                    Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
                    Ok(Ok(_)) => {
                        warn!(key = %key, "Generator returned empty text");
                        None
                    }
                    Ok(Err(e)) => {
                        warn!(key = %key, error = %e, "Message generation failed");
                        None
                    }
                    Err(_) => {
                        warn!(
                            key = %key,
                            timeout_ms = self.settings.generation_timeout.as_millis() as u64,
                            "Message generation timed out"
                        );
                        None
                    }
                };

                guard.finish(outcome.clone());

                match outcome {
                    Some(text) => Resolved {
                        text,
                        source: MessageSource::Generated,
                    },
                    None => self.fallback(fallback),
                }
            }
        }
    }

    fn fallback(&self, fallback: impl FnOnce() -> String) -> Resolved {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        Resolved {
            text: fallback(),
            source: MessageSource::Fallback,
        }
    }

    /// Atomically decide this caller's role for `key`.
    fn claim(&self, key: &CacheKey) -> Claim {
        let ttl = self.settings.ttl;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Ready { text, created_at } if created_at.elapsed() < ttl => {
                        return Claim::Hit(text.clone());
                    }
                    Slot::InFlight { tx, .. } => return Claim::Wait(tx.subscribe()),
                    Slot::Ready { .. } => {}
                }
                // Expired: take over the slot
                let (tx, _) = broadcast::channel(1);
                occupied.insert(Slot::InFlight {
                    tx: tx.clone(),
                    started_at: Instant::now(),
                });
                Claim::Lead(tx)
            }
            Entry::Vacant(vacant) => {
                let (tx, _) = broadcast::channel(1);
                vacant.insert(Slot::InFlight {
                    tx: tx.clone(),
                    started_at: Instant::now(),
                });
                Claim::Lead(tx)
            }
        }
    }

    /// Publish the leader's outcome and settle the slot.
    ///
    /// The map is updated before the broadcast so a caller arriving afterwards
    /// sees the ready entry instead of a dead channel.
    fn complete(&self, key: &CacheKey, tx: &broadcast::Sender<Option<String>>, outcome: Option<String>) {
        match &outcome {
            Some(text) => {
                if let Entry::Occupied(mut occupied) = self.entries.entry(key.clone()) {
                    let ours = matches!(occupied.get(), Slot::InFlight { tx: current, .. } if current.same_channel(tx));
                    if ours {
                        occupied.insert(Slot::Ready {
                            text: text.clone(),
                            created_at: Instant::now(),
                        });
                    }
                }
            }
            None => {
                self.entries.remove_if(key, |_, slot| {
                    matches!(slot, Slot::InFlight { tx: current, .. } if current.same_channel(tx))
                });
            }
        }

        let waiting = tx.receiver_count();
        if waiting > 0 {
            debug!(key = %key, waiting = waiting, success = outcome.is_some(), "Completing coalesced request");
        }
        let _ = tx.send(outcome);

        self.enforce_capacity();
    }

    /// Live cached text for `key`, if any. Expired entries are dropped on read.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let ttl = self.settings.ttl;
        {
            let slot = self.entries.get(key)?;
            if let Slot::Ready { text, created_at } = slot.value() {
                if created_at.elapsed() < ttl {
                    return Some(text.clone());
                }
            } else {
                return None;
            }
        }
        self.entries
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready { created_at, .. } if created_at.elapsed() >= ttl));
        None
    }

    /// Remove a ready entry. In-flight generations are left alone.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready { .. }))
            .is_some()
    }

    /// Drop every ready entry.
    pub fn clear(&self) {
        self.entries.retain(|_, slot| matches!(slot, Slot::InFlight { .. }));
    }

    /// Remove expired ready entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.settings.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Ready { created_at, .. } => created_at.elapsed() < ttl,
            Slot::InFlight { .. } => true,
        });
        before.saturating_sub(self.entries.len())
    }

    /// Evict the oldest ready entries until the cache fits `max_entries`.
    fn enforce_capacity(&self) {
        let max = self.settings.max_entries;
        if max == 0 || self.entries.len() <= max {
            return;
        }

        self.purge_expired();
        let excess = self.entries.len().saturating_sub(max);
        if excess == 0 {
            return;
        }

        let mut ready: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready { created_at, .. } => Some((entry.key().clone(), *created_at)),
                Slot::InFlight { .. } => None,
            })
            .collect();
        ready.sort_by_key(|(_, created_at)| *created_at);

        for (key, _) in ready.into_iter().take(excess) {
            self.entries
                .remove_if(&key, |_, slot| matches!(slot, Slot::Ready { .. }));
        }
        debug!(evicted = excess, "Cache over capacity, evicted oldest entries");
    }

    /// Ready plus in-flight entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generations currently running, with the age of the oldest.
    pub fn in_flight(&self) -> (usize, Option<Duration>) {
        let mut count = 0;
        let mut oldest: Option<Duration> = None;
        for entry in self.entries.iter() {
            if let Slot::InFlight { started_at, .. } = entry.value() {
                count += 1;
                let age = started_at.elapsed();
                oldest = Some(oldest.map_or(age, |o| o.max(age)));
            }
        }
        (count, oldest)
    }

    pub fn stats(&self) -> CacheStats {
        let (in_flight, _) = self.in_flight();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            size: self.entries.len().saturating_sub(in_flight),
            in_flight,
        }
    }
}

/// Clears the in-flight marker if the leader never reaches `finish`.
struct InFlightGuard<'a> {
    cache: &'a MessageCache,
    key: CacheKey,
    tx: broadcast::Sender<Option<String>>,
    done: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self, outcome: Option<String>) {
        self.done = true;
        self.cache.complete(&self.key, &self.tx, outcome);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(key = %self.key, "Leader dropped mid-generation, clearing in-flight marker");
            self.cache.complete(&self.key, &self.tx, None);
        }
    }
}

#[cfg(test)]
mod tests;
