use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use parrot_contracts::{SpaceId, UserId};

/// True once `cooldown_seconds` have passed since `last`.
///
/// A missing `last` stands for the unix epoch, so a user who never got a
/// response is always eligible.
fn cooldown_elapsed(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown_seconds: u64,
) -> bool {
    let Some(last) = last else {
        return true;
    };
    let Some(window) = i64::try_from(cooldown_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
    else {
        return false;
    };
    now.signed_duration_since(last) >= window
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim<T> {
    CoolingDown,
    Missed,
    Claimed(T),
}

/// Last successful response per (space, user). Lives for the process only.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_response: Mutex<HashMap<SpaceId, HashMap<UserId, DateTime<Utc>>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eligible(
        &self,
        space: SpaceId,
        user: UserId,
        now: DateTime<Utc>,
        cooldown_seconds: u64,
    ) -> bool {
        let map = self.lock();
        let last = map.get(&space).and_then(|users| users.get(&user)).copied();
        cooldown_elapsed(last, now, cooldown_seconds)
    }

    pub fn record_response(&self, space: SpaceId, user: UserId, now: DateTime<Utc>) {
        self.lock().entry(space).or_default().insert(user, now);
    }

    /// Eligibility check, `pick` and the cooldown update under one lock.
    ///
    /// The timestamp is recorded only when `pick` returns `Some`, so two
    /// concurrent messages from the same user cannot both be answered.
    pub fn claim<T>(
        &self,
        space: SpaceId,
        user: UserId,
        now: DateTime<Utc>,
        cooldown_seconds: u64,
        pick: impl FnOnce() -> Option<T>,
    ) -> Claim<T> {
        let mut map = self.lock();
        let users = map.entry(space).or_default();
        if !cooldown_elapsed(users.get(&user).copied(), now, cooldown_seconds) {
            return Claim::CoolingDown;
        }
        match pick() {
            Some(value) => {
                users.insert(user, now);
                Claim::Claimed(value)
            }
            None => Claim::Missed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SpaceId, HashMap<UserId, DateTime<Utc>>>> {
        // A panic elsewhere leaves the map consistent; keep serving.
        self.last_response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
