use async_trait::async_trait;
use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ReferralStore, StatusCount, UserStore};
use crate::domain::{
    errors::{StoreError, UniqueConstraint},
    fields::{Referral, ReferralCode, ReferralStatus, UserApp},
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserApp>,
    referrals: HashMap<Uuid, Referral>,
}

/// Process-local store with the same uniqueness and compare-and-set rules
/// as the Postgres schema.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserApp) {
        self.lock().users.insert(user.id, user);
    }

    pub fn referral_count(&self) -> usize {
        self.lock().referrals.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, predicate: impl Fn(&Referral) -> bool) -> Option<Referral> {
        self.lock().referrals.values().find(|r| predicate(r)).cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserApp>, StoreError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn find_user_by_referral_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<UserApp>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| &u.referral_code == code)
            .cloned())
    }
}

#[async_trait]
impl ReferralStore for InMemoryStore {
    async fn insert(&self, referral: &Referral) -> Result<(), StoreError> {
        let mut state = self.lock();

        for existing in state.referrals.values() {
            if existing.token == referral.token {
                return Err(StoreError::UniqueViolation(UniqueConstraint::Token));
            }
            if existing.slug == referral.slug {
                return Err(StoreError::UniqueViolation(UniqueConstraint::Slug));
            }
            if referral.idempotency_key.is_some()
                && existing.referrer_user_id == referral.referrer_user_id
                && existing.idempotency_key == referral.idempotency_key
            {
                return Err(StoreError::UniqueViolation(UniqueConstraint::IdempotencyKey));
            }
        }

        state.referrals.insert(referral.id, referral.clone());
        Ok(())
    }

    async fn update_if_status(
        &self,
        referral: &Referral,
        expected: ReferralStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.referrals.get_mut(&referral.id) {
            Some(stored) if stored.status() == expected => {
                *stored = referral.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError> {
        Ok(self.lock().referrals.get(&referral_id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Referral>, StoreError> {
        Ok(self.find(|r| r.token == token))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Referral>, StoreError> {
        Ok(self.find(|r| r.slug == slug))
    }

    async fn find_open_by_code_and_slug(
        &self,
        code: &ReferralCode,
        slug: &str,
    ) -> Result<Option<Referral>, StoreError> {
        Ok(self.find(|r| &r.referral_code == code && r.slug == slug && r.status().is_open()))
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Referral>, StoreError> {
        Ok(self.find(|r| r.referrer_user_id == user_id && r.idempotency_key.as_deref() == Some(key)))
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError> {
        let mut referrals: Vec<Referral> = self
            .lock()
            .referrals
            .values()
            .filter(|r| r.referrer_user_id == user_id)
            .filter(|r| status.map_or(true, |s| r.status() == s))
            .cloned()
            .collect();

        // `None` sorts below `Some`, so unreserved rows land last.
        referrals.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.reserved_at())));
        Ok(referrals)
    }

    async fn count_by_status(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<StatusCount>, StoreError> {
        let mut counts: HashMap<(ReferralStatus, bool), i64> = HashMap::new();
        for referral in self
            .lock()
            .referrals
            .values()
            .filter(|r| r.referrer_user_id == user_id)
        {
            *counts
                .entry((referral.status(), referral.is_expired(now)))
                .or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((status, expired), count)| StatusCount {
                status,
                expired,
                count,
            })
            .collect())
    }
}
