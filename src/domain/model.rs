use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Serialize, Deserialize, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub(crate) display_name: String,
    pub(crate) referral_code: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, FromRow)]
pub struct DbReferral {
    pub id: Uuid,
    pub(crate) referrer_user_id: Uuid,
    pub(crate) referral_code: String,
    pub(crate) status: i16,
    pub(crate) token: String,
    pub(crate) slug: String,
    pub(crate) link: String,
    pub(crate) campaign: Option<String>,
    pub(crate) idempotency_key: Option<String>,
    pub(crate) expires_at: OffsetDateTime,
    pub(crate) reserved_at_utc: Option<OffsetDateTime>,
    pub(crate) accepted_at_utc: Option<OffsetDateTime>,
    pub(crate) accepted_by_user_id: Option<Uuid>,
    pub(crate) token_consumed_utc: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
}

/// One row of `group by status` output, split on whether the row is past
/// its expiry at query time.
#[derive(Serialize, Deserialize, FromRow)]
pub struct DbStatusCount {
    pub(crate) status: i16,
    pub(crate) expired: bool,
    pub(crate) count: i64,
}
