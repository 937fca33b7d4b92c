use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ReferralStore, StatusCount, UserStore};
use crate::domain::{
    errors::StoreError,
    fields::{Referral, ReferralCode, ReferralStatus, UserApp},
    model::{DbReferral, DbStatusCount, DbUser},
};

const REFERRAL_COLUMNS: &str = "id, referrer_user_id, referral_code, status, token, slug, link, \
     campaign, idempotency_key, expires_at, reserved_at_utc, accepted_at_utc, \
     accepted_by_user_id, token_consumed_utc, created_at";

fn log_failure(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        let err = StoreError::from(e);
        if !matches!(err, StoreError::UniqueViolation(_)) {
            tracing::error!("{} failed >>> {}", context, err);
        }
        err
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> Result<Option<Referral>, StoreError> {
        let sql = format!("select {} from referrals where {} = $1", REFERRAL_COLUMNS, clause);
        let row = sqlx::query_as::<_, DbReferral>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_failure("fetching referral"))?;

        row.map(Referral::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserApp>, StoreError> {
        let user = sqlx::query_as::<_, DbUser>(
            "select id, display_name, referral_code, created_at from users where id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_failure("get user by id"))?;

        Ok(user.map(|u| u.into()))
    }

    async fn find_user_by_referral_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<UserApp>, StoreError> {
        let user = sqlx::query_as::<_, DbUser>(
            "select id, display_name, referral_code, created_at from users where referral_code = $1",
        )
        .bind(code.as_ref())
        .fetch_optional(&self.pool)
        .await
        .map_err(log_failure("get user by referral code"))?;

        Ok(user.map(|u| u.into()))
    }
}

#[async_trait]
impl ReferralStore for PgStore {
    async fn insert(&self, referral: &Referral) -> Result<(), StoreError> {
        sqlx::query(
            "insert into referrals (id, referrer_user_id, referral_code, status, token, slug, link, \
             campaign, idempotency_key, expires_at, created_at, last_modified) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)",
        )
        .bind(referral.id)
        .bind(referral.referrer_user_id)
        .bind(referral.referral_code.as_ref())
        .bind(referral.status().as_i16())
        .bind(&referral.token)
        .bind(&referral.slug)
        .bind(&referral.link)
        .bind(referral.campaign.as_deref())
        .bind(referral.idempotency_key.as_deref())
        .bind(referral.expires_at)
        .bind(referral.created_at)
        .execute(&self.pool)
        .await
        .map_err(log_failure("inserting referral"))?;

        Ok(())
    }

    async fn update_if_status(
        &self,
        referral: &Referral,
        expected: ReferralStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "update referrals set status = $1, reserved_at_utc = $2, accepted_at_utc = $3, \
             accepted_by_user_id = $4, token_consumed_utc = $5, last_modified = now() \
             where id = $6 and status = $7",
        )
        .bind(referral.status().as_i16())
        .bind(referral.reserved_at())
        .bind(referral.accepted_at())
        .bind(referral.accepted_by_user_id())
        .bind(referral.token_consumed_at())
        .bind(referral.id)
        .bind(expected.as_i16())
        .execute(&self.pool)
        .await
        .map_err(log_failure("updating referral status"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError> {
        let sql = format!("select {} from referrals where id = $1", REFERRAL_COLUMNS);
        let row = sqlx::query_as::<_, DbReferral>(&sql)
            .bind(referral_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_failure("fetching referral"))?;

        row.map(Referral::try_from).transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Referral>, StoreError> {
        self.fetch_one_where("token", token).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Referral>, StoreError> {
        self.fetch_one_where("slug", slug).await
    }

    async fn find_open_by_code_and_slug(
        &self,
        code: &ReferralCode,
        slug: &str,
    ) -> Result<Option<Referral>, StoreError> {
        let sql = format!(
            "select {} from referrals where referral_code = $1 and slug = $2 and status in ($3, $4)",
            REFERRAL_COLUMNS
        );
        let row = sqlx::query_as::<_, DbReferral>(&sql)
            .bind(code.as_ref())
            .bind(slug)
            .bind(ReferralStatus::Pending.as_i16())
            .bind(ReferralStatus::Reserved.as_i16())
            .fetch_optional(&self.pool)
            .await
            .map_err(log_failure("fetching referral"))?;

        row.map(Referral::try_from).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Referral>, StoreError> {
        let sql = format!(
            "select {} from referrals where referrer_user_id = $1 and idempotency_key = $2",
            REFERRAL_COLUMNS
        );
        let row = sqlx::query_as::<_, DbReferral>(&sql)
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_failure("fetching referral"))?;

        row.map(Referral::try_from).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("select {} from referrals where referrer_user_id = ", REFERRAL_COLUMNS));
        query.push_bind(user_id);

        if let Some(status) = status {
            query.push(" and status = ");
            query.push_bind(status.as_i16());
        }

        query.push(" order by created_at desc, reserved_at_utc desc nulls last ");

        let rows = query
            .build_query_as::<DbReferral>()
            .fetch_all(&self.pool)
            .await
            .map_err(log_failure("getting list of referrals"))?;

        rows.into_iter().map(Referral::try_from).collect()
    }

    async fn count_by_status(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<StatusCount>, StoreError> {
        let rows = sqlx::query_as::<_, DbStatusCount>(
            "select status, (expires_at <= $2) as expired, count(*) as count \
             from referrals where referrer_user_id = $1 group by 1, 2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(log_failure("counting referrals by status"))?;

        rows.into_iter()
            .map(|row| {
                Ok(StatusCount {
                    status: ReferralStatus::try_from(row.status)?,
                    expired: row.expired,
                    count: row.count,
                })
            })
            .collect()
    }
}
