//! Storage capabilities required by the lifecycle engine.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    errors::StoreError,
    fields::{Referral, ReferralCode, ReferralStatus, UserApp},
};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCount {
    pub status: ReferralStatus,
    /// Whether the counted rows were past `expires_at` at query time.
    pub expired: bool,
    pub count: i64,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserApp>, StoreError>;

    async fn find_user_by_referral_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<UserApp>, StoreError>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Fails with `StoreError::UniqueViolation` when the token, the slug or
    /// the `(referrer, idempotency key)` pair is already taken.
    async fn insert(&self, referral: &Referral) -> Result<(), StoreError>;

    /// Compare-and-set write of the mutable lifecycle columns. Applies only
    /// while the stored status still equals `expected`; returns whether the
    /// row was written.
    async fn update_if_status(
        &self,
        referral: &Referral,
        expected: ReferralStatus,
    ) -> Result<bool, StoreError>;

    async fn find_by_id(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Referral>, StoreError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Referral>, StoreError>;

    /// The Pending or Reserved referral matching both code and slug.
    async fn find_open_by_code_and_slug(
        &self,
        code: &ReferralCode,
        slug: &str,
    ) -> Result<Option<Referral>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Referral>, StoreError>;

    /// Newest-created first, ties broken by most recently reserved.
    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError>;

    async fn count_by_status(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<StatusCount>, StoreError>;
}
