use std::time::{SystemTime, UNIX_EPOCH};

use chatwarden_core::Identity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Per-identity cooldown gate.
///
/// `try_acquire` is a per-key check-and-set: the map entry lock is held for
/// the whole read-compare-write, so two concurrent calls for the same
/// identity cannot both be admitted inside one cooldown window. Distinct
/// identities never contend beyond shard granularity.
pub struct RateLimiter {
    cooldown_secs: i64,
    last_admitted: DashMap<Identity, i64>,
}

impl RateLimiter {
    pub fn new(cooldown_secs: i64) -> Self {
        Self { cooldown_secs, last_admitted: DashMap::new() }
    }

    /// Admit the caller iff its cooldown has elapsed, recording "now" as the
    /// new last-admitted time on success. A cooldown of zero or less always
    /// admits.
    pub fn try_acquire(&self, identity: Identity) -> bool {
        self.try_acquire_at(identity, epoch_now())
    }

    /// Seconds until the next admission; zero when never admitted or already
    /// eligible. Best-effort read, never mutates.
    pub fn remaining_cooldown(&self, identity: Identity) -> i64 {
        self.remaining_at(identity, epoch_now())
    }

    fn try_acquire_at(&self, identity: Identity, now: i64) -> bool {
        match self.last_admitted.entry(identity) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now - *slot.get() >= self.cooldown_secs {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn remaining_at(&self, identity: Identity, now: i64) -> i64 {
        match self.last_admitted.get(&identity) {
            None => 0,
            Some(last) => (self.cooldown_secs - (now - *last)).max(0),
        }
    }
}

fn epoch_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs() as i64).unwrap_or(0)
}
