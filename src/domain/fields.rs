use serde::{Deserialize, Serialize};
use std::fmt::Display;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    errors::{ReferralError, StoreError},
    model::{DbReferral, DbUser},
};

/// Stored lifecycle status of a referral.
///
/// Expiry is not a status: it is derived from `expires_at` at the time of
/// each operation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Reserved,
    Accepted,
    Cancelled,
}

impl ReferralStatus {
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Reserved => 1,
            Self::Accepted => 2,
            Self::Cancelled => 4,
        }
    }

    /// Statuses a referral can still be validated or accepted from.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Reserved)
    }
}

impl TryFrom<i16> for ReferralStatus {
    type Error = StoreError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Reserved),
            2 => Ok(Self::Accepted),
            4 => Ok(Self::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown referral status {}", other))),
        }
    }
}

impl Display for ReferralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Reserved => "Reserved",
            Self::Accepted => "Accepted",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferralCode(String);

impl ReferralCode {
    pub fn inner(&self) -> String {
        self.0.to_owned()
    }
}

impl From<String> for ReferralCode {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ReferralCode {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for ReferralCode {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The referrer identity. Created out of band, read-only here.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserApp {
    pub id: Uuid,
    pub display_name: String,
    pub referral_code: ReferralCode,
}

impl From<DbUser> for UserApp {
    fn from(value: DbUser) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            referral_code: value.referral_code.into(),
        }
    }
}

/// Public link material assigned to a referral exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub url: String,
    pub token: String,
    pub slug: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_user_id: Uuid,
    pub referral_code: ReferralCode,
    pub campaign: Option<String>,
    pub idempotency_key: Option<String>,
    pub token: String,
    pub slug: String,
    pub link: String,
    status: ReferralStatus,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    reserved_at: Option<OffsetDateTime>,
    accepted_at: Option<OffsetDateTime>,
    accepted_by_user_id: Option<Uuid>,
    token_consumed_at: Option<OffsetDateTime>,
}

impl Referral {
    /// A fresh `Pending` referral for `user`. Link material is attached
    /// separately with [`Referral::assign_link`].
    pub fn new(
        user: &UserApp,
        campaign: Option<String>,
        idempotency_key: Option<String>,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            referrer_user_id: user.id,
            referral_code: user.referral_code.clone(),
            campaign,
            idempotency_key,
            token: String::new(),
            slug: String::new(),
            link: String::new(),
            status: ReferralStatus::Pending,
            created_at,
            expires_at,
            reserved_at: None,
            accepted_at: None,
            accepted_by_user_id: None,
            token_consumed_at: None,
        }
    }

    pub fn assign_link(&mut self, link: LinkInfo) {
        self.link = link.url;
        self.token = link.token;
        self.slug = link.slug;
    }

    pub fn status(&self) -> ReferralStatus {
        self.status
    }

    pub fn reserved_at(&self) -> Option<OffsetDateTime> {
        self.reserved_at
    }

    pub fn accepted_at(&self) -> Option<OffsetDateTime> {
        self.accepted_at
    }

    pub fn accepted_by_user_id(&self) -> Option<Uuid> {
        self.accepted_by_user_id
    }

    pub fn token_consumed_at(&self) -> Option<OffsetDateTime> {
        self.token_consumed_at
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Pending -> Reserved. Returns `Ok(false)` when already reserved.
    pub fn reserve(&mut self, now: OffsetDateTime) -> Result<bool, ReferralError> {
        if self.is_expired(now) {
            return Err(ReferralError::Expired(self.id));
        }

        match self.status {
            ReferralStatus::Reserved => Ok(false),
            ReferralStatus::Pending => {
                self.status = ReferralStatus::Reserved;
                self.reserved_at = Some(now);
                Ok(true)
            }
            from => Err(self.invalid_transition(from, "reserve")),
        }
    }

    /// Pending/Reserved -> Accepted. Returns `Ok(false)` when already
    /// accepted; the first timestamps are left untouched.
    pub fn accept(
        &mut self,
        now: OffsetDateTime,
        accepted_by: Option<Uuid>,
    ) -> Result<bool, ReferralError> {
        if self.is_expired(now) {
            return Err(ReferralError::Expired(self.id));
        }

        match self.status {
            ReferralStatus::Accepted => Ok(false),
            ReferralStatus::Pending | ReferralStatus::Reserved => {
                self.status = ReferralStatus::Accepted;
                self.accepted_at = Some(now);
                self.token_consumed_at = Some(now);
                self.accepted_by_user_id = accepted_by;
                Ok(true)
            }
            from => Err(self.invalid_transition(from, "accept")),
        }
    }

    /// Pending/Reserved -> Cancelled. Returns `Ok(false)` when already
    /// cancelled.
    pub fn cancel(&mut self, reason: &str) -> Result<bool, ReferralError> {
        match self.status {
            ReferralStatus::Cancelled => Ok(false),
            ReferralStatus::Pending | ReferralStatus::Reserved => {
                tracing::debug!(referral_id = %self.id, reason, "cancelling referral");
                self.status = ReferralStatus::Cancelled;
                Ok(true)
            }
            from => Err(self.invalid_transition(from, "cancel")),
        }
    }

    fn invalid_transition(&self, from: ReferralStatus, operation: &'static str) -> ReferralError {
        ReferralError::InvalidStateTransition {
            referral_id: self.id,
            from,
            operation,
        }
    }
}

impl TryFrom<DbReferral> for Referral {
    type Error = StoreError;

    fn try_from(value: DbReferral) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            referrer_user_id: value.referrer_user_id,
            referral_code: value.referral_code.into(),
            campaign: value.campaign,
            idempotency_key: value.idempotency_key,
            token: value.token,
            slug: value.slug,
            link: value.link,
            status: ReferralStatus::try_from(value.status)?,
            created_at: value.created_at,
            expires_at: value.expires_at,
            reserved_at: value.reserved_at_utc,
            accepted_at: value.accepted_at_utc,
            accepted_by_user_id: value.accepted_by_user_id,
            token_consumed_at: value.token_consumed_utc,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn referral_at(now: OffsetDateTime) -> Referral {
        let user = UserApp {
            id: Uuid::new_v4(),
            display_name: "Sam".into(),
            referral_code: "SAM-3F4X9K".into(),
        };
        Referral::new(&user, None, None, now, now + Duration::days(30))
    }

    #[test]
    fn reserve_is_idempotent() {
        let now = OffsetDateTime::now_utc();
        let mut referral = referral_at(now);

        assert!(referral.reserve(now).unwrap());
        let reserved_at = referral.reserved_at();
        assert!(!referral.reserve(now + Duration::minutes(1)).unwrap());
        assert_eq!(referral.status(), ReferralStatus::Reserved);
        assert_eq!(referral.reserved_at(), reserved_at);
    }

    #[test]
    fn accept_stamps_consumption_once() {
        let now = OffsetDateTime::now_utc();
        let mut referral = referral_at(now);
        let recipient = Uuid::new_v4();

        assert!(referral.accept(now, Some(recipient)).unwrap());
        assert_eq!(referral.accepted_at(), Some(now));
        assert_eq!(referral.token_consumed_at(), Some(now));
        assert_eq!(referral.accepted_by_user_id(), Some(recipient));

        assert!(!referral.accept(now + Duration::hours(1), None).unwrap());
        assert_eq!(referral.accepted_at(), Some(now));
        assert_eq!(referral.accepted_by_user_id(), Some(recipient));
    }

    #[test]
    fn reserve_after_accept_is_rejected() {
        let now = OffsetDateTime::now_utc();
        let mut referral = referral_at(now);
        referral.accept(now, None).unwrap();

        let err = referral.reserve(now).unwrap_err();
        assert!(matches!(
            err,
            ReferralError::InvalidStateTransition {
                from: ReferralStatus::Accepted,
                ..
            }
        ));
    }

    #[test]
    fn cancel_rules() {
        let now = OffsetDateTime::now_utc();

        let mut accepted = referral_at(now);
        accepted.accept(now, None).unwrap();
        assert!(matches!(
            accepted.cancel("fraud"),
            Err(ReferralError::InvalidStateTransition { .. })
        ));
        assert_eq!(accepted.status(), ReferralStatus::Accepted);

        let mut reserved = referral_at(now);
        reserved.reserve(now).unwrap();
        assert!(reserved.cancel("user request").unwrap());
        assert!(!reserved.cancel("user request").unwrap());
        assert_eq!(reserved.status(), ReferralStatus::Cancelled);

        assert!(matches!(
            reserved.accept(now, None),
            Err(ReferralError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn expiry_blocks_transitions_without_changing_status() {
        let now = OffsetDateTime::now_utc();
        let mut referral = referral_at(now);
        let later = referral.expires_at;

        assert!(matches!(referral.reserve(later), Err(ReferralError::Expired(_))));
        assert!(matches!(referral.accept(later, None), Err(ReferralError::Expired(_))));
        assert_eq!(referral.status(), ReferralStatus::Pending);
    }

    #[test]
    fn status_codes_round_trip_through_storage_representation() {
        for status in [
            ReferralStatus::Pending,
            ReferralStatus::Reserved,
            ReferralStatus::Accepted,
            ReferralStatus::Cancelled,
        ] {
            assert_eq!(ReferralStatus::try_from(status.as_i16()).unwrap(), status);
        }
        assert!(ReferralStatus::try_from(3).is_err());
    }
}
