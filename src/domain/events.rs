use super::fields::{Referral, ReferralStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReferralEvent {
    pub referral_id: Uuid,
    pub referrer_user_id: Uuid,
    pub status: ReferralStatus,
    pub campaign: Option<String>,
}

impl From<&Referral> for ReferralEvent {
    fn from(value: &Referral) -> Self {
        Self {
            referral_id: value.id,
            referrer_user_id: value.referrer_user_id,
            status: value.status(),
            campaign: value.campaign.clone(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", content = "data")]
pub enum AppEvent {
    ReferralCreated(ReferralEvent),
    ReferralReserved(ReferralEvent),
    ReferralAccepted(ReferralEvent),
    ReferralCancelled(ReferralEvent),
}

impl AppEvent {
    /// Whether `user_id` should see this event on its stream.
    pub fn concerns(&self, user_id: Uuid) -> bool {
        let event = match self {
            Self::ReferralCreated(e)
            | Self::ReferralReserved(e)
            | Self::ReferralAccepted(e)
            | Self::ReferralCancelled(e) => e,
        };
        event.referrer_user_id == user_id
    }
}
