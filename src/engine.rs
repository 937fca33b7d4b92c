//! Referral lifecycle: creation under fraud and idempotency rules, the
//! validate (reserve) and accept redemption steps, and cancellation.
//!
//! Every operation is an ordinary future; dropping it at any await point
//! cancels it. Each transition is committed by a single compare-and-set
//! write, so a cancelled call leaves the referral either untouched or fully
//! transitioned.

use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    clock::TimeSource,
    config::ReferralConfig,
    domain::{
        errors::{ReferralError, StoreError, UniqueConstraint},
        fields::{Referral, ReferralCode, ReferralStatus},
    },
    fraud::FraudGate,
    links::LinkGenerator,
    repository::{ReferralStore, UserStore},
};

#[derive(Debug, Clone)]
pub struct CreateReferral {
    pub user_id: Uuid,
    pub campaign: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidateReferral {
    pub referral_code: ReferralCode,
    pub slug: String,
    pub vendor_signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub validated: bool,
    pub token: String,
    pub referral: Referral,
    pub written: bool,
}

/// The referral as stored after a call, and whether that call wrote it.
/// Replays and no-op transitions come back with `written == false`.
#[derive(Debug, Clone)]
pub struct Applied {
    pub referral: Referral,
    pub written: bool,
}

impl Applied {
    fn written(referral: Referral) -> Self {
        Self {
            referral,
            written: true,
        }
    }

    fn unchanged(referral: Referral) -> Self {
        Self {
            referral,
            written: false,
        }
    }
}

#[derive(Clone)]
pub struct ReferralEngine {
    fraud: Arc<dyn FraudGate>,
    referrals: Arc<dyn ReferralStore>,
    users: Arc<dyn UserStore>,
    links: Arc<dyn LinkGenerator>,
    clock: Arc<dyn TimeSource>,
    validity: Duration,
    max_link_attempts: u32,
}

impl ReferralEngine {
    pub fn new(
        fraud: Arc<dyn FraudGate>,
        referrals: Arc<dyn ReferralStore>,
        users: Arc<dyn UserStore>,
        links: Arc<dyn LinkGenerator>,
        clock: Arc<dyn TimeSource>,
        config: &ReferralConfig,
    ) -> Self {
        Self {
            fraud,
            referrals,
            users,
            links,
            clock,
            validity: Duration::days(config.validity_days),
            max_link_attempts: config.max_link_attempts.max(1),
        }
    }

    #[tracing::instrument(name = "create referral", skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create(&self, request: CreateReferral) -> Result<Applied, ReferralError> {
        let user_id = request.user_id;

        if self.fraud.is_blocked(user_id).await {
            return Err(ReferralError::FraudBlocked(user_id));
        }

        if !self.fraud.within_create_budget(user_id).await {
            return Err(ReferralError::RateLimited(user_id));
        }

        let user = self
            .users
            .find_user(user_id)
            .await?
            .ok_or(ReferralError::UserNotFound(user_id))?;

        let key = request
            .idempotency_key
            .filter(|k| !k.trim().is_empty());

        if let Some(key) = key.as_deref() {
            if let Some(existing) = self.referrals.find_by_idempotency_key(user_id, key).await? {
                tracing::info!(referral_id = %existing.id, "returning referral for repeated idempotency key");
                return Ok(Applied::unchanged(existing));
            }
        }

        let now = self.clock.now();
        let mut referral = Referral::new(
            &user,
            request.campaign,
            key.clone(),
            now,
            now + self.validity,
        );

        let mut attempt = 1;
        loop {
            referral.assign_link(self.links.generate(&referral, now));

            match self.referrals.insert(&referral).await {
                Ok(()) => {
                    tracing::info!(referral_id = %referral.id, "referral created");
                    return Ok(Applied::written(referral));
                }
                Err(StoreError::UniqueViolation(UniqueConstraint::IdempotencyKey)) => {
                    // A concurrent call with the same key won the insert.
                    let key = key.as_deref().unwrap_or_default();
                    let winner = self
                        .referrals
                        .find_by_idempotency_key(user_id, key)
                        .await?
                        .ok_or(ReferralError::Store(StoreError::UniqueViolation(
                            UniqueConstraint::IdempotencyKey,
                        )))?;
                    tracing::info!(referral_id = %winner.id, "idempotency key taken concurrently");
                    return Ok(Applied::unchanged(winner));
                }
                Err(StoreError::UniqueViolation(constraint)) if attempt < self.max_link_attempts => {
                    tracing::warn!(
                        attempt,
                        index = constraint.index_name(),
                        "link collision, regenerating"
                    );
                    attempt += 1;
                    referral.id = Uuid::new_v4();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Redeem step one: resolves a public `(code, slug)` pair into the
    /// private token and reserves the referral.
    #[tracing::instrument(name = "validate referral", skip(self, request), fields(slug = %request.slug))]
    pub async fn validate(
        &self,
        request: ValidateReferral,
    ) -> Result<ValidationOutcome, ReferralError> {
        if !self
            .fraud
            .validate_vendor_signature(request.vendor_signature.as_deref())
            .await
        {
            return Err(ReferralError::ValidationFailed(
                "Vendor signature validation failed.".into(),
            ));
        }

        let referral = self
            .referrals
            .find_open_by_code_and_slug(&request.referral_code, &request.slug)
            .await?
            .ok_or_else(|| {
                ReferralError::NotFound(format!("No referral matched slug '{}'.", request.slug))
            })?;

        let Applied { referral, written } =
            self.transition(referral, |r, now| r.reserve(now)).await?;
        tracing::info!(referral_id = %referral.id, written, "referral reserved");

        Ok(ValidationOutcome {
            validated: true,
            token: referral.token.clone(),
            referral,
            written,
        })
    }

    /// Redeem step two: consumes the token.
    #[tracing::instrument(name = "accept referral", skip(self, token))]
    pub async fn accept(
        &self,
        token: &str,
        accepted_by: Option<Uuid>,
    ) -> Result<Applied, ReferralError> {
        if token.trim().is_empty() {
            return Err(ReferralError::ValidationFailed("Token is required.".into()));
        }

        let referral = self
            .referrals
            .find_by_token(token)
            .await?
            .ok_or_else(|| ReferralError::NotFound("Referral token not found.".into()))?;

        let applied = self
            .transition(referral, |r, now| r.accept(now, accepted_by))
            .await?;
        tracing::info!(
            referral_id = %applied.referral.id,
            written = applied.written,
            "referral accepted"
        );

        Ok(applied)
    }

    #[tracing::instrument(name = "cancel referral", skip(self, reason))]
    pub async fn cancel(
        &self,
        referral_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<Applied, ReferralError> {
        let referral = self.get_by_id(referral_id, user_id).await?;
        let applied = self.transition(referral, |r, _| r.cancel(reason)).await?;
        tracing::info!(
            referral_id = %applied.referral.id,
            written = applied.written,
            reason,
            "referral cancelled"
        );

        Ok(applied)
    }

    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, ReferralError> {
        Ok(self.referrals.list_by_user(user_id, status).await?)
    }

    pub async fn get_by_id(
        &self,
        referral_id: Uuid,
        user_id: Uuid,
    ) -> Result<Referral, ReferralError> {
        self.referrals
            .find_by_id(referral_id)
            .await?
            .filter(|r| r.referrer_user_id == user_id)
            .ok_or_else(|| {
                ReferralError::NotFound(format!(
                    "Referral '{}' not found for the given user.",
                    referral_id
                ))
            })
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Referral, ReferralError> {
        self.referrals.find_by_slug(slug).await?.ok_or_else(|| {
            ReferralError::NotFound(format!("Referral with slug '{}' was not found.", slug))
        })
    }

    /// Applies `apply` and persists the result with a compare-and-set on
    /// the previous status. On a lost race the row is re-read and the
    /// transition re-applied. Status only moves forward, so the loop ends.
    async fn transition<F>(&self, mut referral: Referral, apply: F) -> Result<Applied, ReferralError>
    where
        F: Fn(&mut Referral, OffsetDateTime) -> Result<bool, ReferralError> + Send + Sync,
    {
        loop {
            let expected = referral.status();
            if !apply(&mut referral, self.clock.now())? {
                return Ok(Applied::unchanged(referral));
            }

            if self.referrals.update_if_status(&referral, expected).await? {
                return Ok(Applied::written(referral));
            }

            let id = referral.id;
            tracing::debug!(referral_id = %id, "lost transition race, re-reading");
            referral = self
                .referrals
                .find_by_id(id)
                .await?
                .ok_or_else(|| ReferralError::NotFound(format!("Referral '{}' vanished.", id)))?;
        }
    }
}
