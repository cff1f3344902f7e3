//! Idempotency cache for creation requests.
//!
//! Clients may send an `Idempotency-Key` header with any creation request.
//! The first successful creation carrying a key records `key -> resource id`;
//! every later creation with the same key is answered with that resource
//! instead of creating another one. Records never expire.
//!
//! # Concurrency
//!
//! The outer map is locked only long enough to fetch the per-key slot. The
//! slot lock is then held across lookup, creation and store via
//! [`IdempotencyCache::reserve`], so two concurrent requests carrying the same
//! fresh key produce exactly one resource. Requests with different keys never
//! wait on each other beyond the outer lookup.
//!
//! A slot only outlives its reservation once a resource id is recorded in
//! it. Failed creations leave nothing behind.
//!
//! Lock order: idempotency slot, then resource collection. The outer map is
//! a synchronous lock that is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::validation::validate_idempotency_key;

/// Header carrying the client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

type Slot = Arc<Mutex<Option<Uuid>>>;
type SlotMap = Arc<SyncMutex<HashMap<String, Slot>>>;

/// Process-lifetime map of idempotency key to created resource id.
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    slots: SlotMap,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource id recorded for `key`, if any. Empty keys are never recorded.
    pub async fn lookup(&self, key: &str) -> Option<Uuid> {
        if key.is_empty() {
            return None;
        }

        let slot = lock_slots(&self.slots).get(key).cloned()?;
        let recorded = *slot.lock().await;
        drop(slot);

        if recorded.is_none() {
            // Left behind by a reservation that was still observed while it dropped
            let mut slots = lock_slots(&self.slots);
            let vacant = slots.get(key).is_some_and(|slot| {
                Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|held| held.is_none())
            });
            if vacant {
                slots.remove(key);
            }
        }
        recorded
    }

    /// Record `resource_id` for `key` unless the key is already taken.
    ///
    /// A no-op for the empty key.
    pub async fn store(&self, key: &str, resource_id: Uuid) {
        if key.is_empty() {
            return;
        }

        let slot = self.slot(key);
        let mut recorded = slot.lock().await;
        if recorded.is_none() {
            *recorded = Some(resource_id);
        }
    }

    /// Take exclusive ownership of `key` until the returned reservation drops.
    ///
    /// Other reservations and stores for the same key wait; lookups for the
    /// same key also wait, so they never see a half-finished creation.
    pub async fn reserve(&self, key: &str) -> Reservation {
        let slot = self.slot(key);
        Reservation {
            key: key.to_owned(),
            slots: Arc::clone(&self.slots),
            guard: slot.lock_owned().await,
        }
    }

    /// Number of keys with a recorded resource.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = lock_slots(&self.slots).values().cloned().collect();

        let mut recorded = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                recorded += 1;
            }
        }
        recorded
    }

    /// Number of keys holding a slot, recorded or still reserved.
    pub fn tracked_keys(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = lock_slots(&self.slots);
        Arc::clone(slots.entry(key.to_owned()).or_default())
    }
}

fn lock_slots(slots: &SyncMutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive hold on one idempotency key.
///
/// Dropping it without [`Reservation::record`] releases the key and, when no
/// other request is waiting on it, forgets the key entirely.
#[derive(Debug)]
pub struct Reservation {
    key: String,
    slots: SlotMap,
    guard: OwnedMutexGuard<Option<Uuid>>,
}

impl Reservation {
    /// Resource id already recorded for the key.
    pub fn existing(&self) -> Option<Uuid> {
        *self.guard
    }

    /// Record the freshly created resource and release the key.
    ///
    /// An already recorded id is never overwritten.
    pub fn record(mut self, resource_id: Uuid) {
        if self.guard.is_none() {
            *self.guard = Some(resource_id);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }

        let mut slots = lock_slots(&self.slots);
        // Referenced only by the map and this guard: nobody else is waiting
        let unclaimed = slots.get(&self.key).is_some_and(|slot| {
            Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&self.guard)) && Arc::strong_count(slot) == 2
        });
        if unclaimed {
            slots.remove(&self.key);
        }
    }
}

/// Extractor for the optional `Idempotency-Key` header.
///
/// A missing or blank header yields `None`. A key that is too long or carries
/// anything other than visible ASCII is rejected with 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let key = value.to_str().map_err(|_| {
            AppError::BadRequest("Idempotency-Key must be visible ASCII".to_string())
        })?;
        let key = key.trim();
        if key.is_empty() {
            debug!("Blank idempotency key treated as absent");
            return Ok(Self(None));
        }

        validate_idempotency_key(key)?;
        Ok(Self(Some(key.to_owned())))
    }
}
