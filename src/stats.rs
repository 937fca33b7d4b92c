//! Per-user referral counts.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::TimeSource,
    domain::{errors::ReferralError, fields::ReferralStatus},
    repository::{ReferralStore, StatusCount},
};

/// Counts per status for one referrer.
///
/// `expired` holds Pending and Reserved referrals whose `expires_at` has
/// passed; they are not counted again under `pending` or `reserved`, so the
/// buckets always sum to `total`.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub total: i64,
    pub pending: i64,
    pub reserved: i64,
    pub accepted: i64,
    pub expired: i64,
    pub cancelled: i64,
}

impl ReferralStats {
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        counts.iter().fold(Self::default(), |mut stats, row| {
            stats.total += row.count;
            let bucket = match row.status {
                ReferralStatus::Pending | ReferralStatus::Reserved if row.expired => {
                    &mut stats.expired
                }
                ReferralStatus::Pending => &mut stats.pending,
                ReferralStatus::Reserved => &mut stats.reserved,
                ReferralStatus::Accepted => &mut stats.accepted,
                ReferralStatus::Cancelled => &mut stats.cancelled,
            };
            *bucket += row.count;
            stats
        })
    }
}

#[derive(Clone)]
pub struct StatsAggregator {
    referrals: Arc<dyn ReferralStore>,
    clock: Arc<dyn TimeSource>,
}

impl StatsAggregator {
    pub fn new(referrals: Arc<dyn ReferralStore>, clock: Arc<dyn TimeSource>) -> Self {
        Self { referrals, clock }
    }

    pub async fn get_stats(&self, user_id: Uuid) -> Result<ReferralStats, ReferralError> {
        let counts = self
            .referrals
            .count_by_status(user_id, self.clock.now())
            .await?;

        Ok(ReferralStats::from_counts(&counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: ReferralStatus, expired: bool, count: i64) -> StatusCount {
        StatusCount {
            status,
            expired,
            count,
        }
    }

    #[test]
    fn expired_open_rows_move_to_expired_bucket() {
        let stats = ReferralStats::from_counts(&[
            row(ReferralStatus::Pending, false, 3),
            row(ReferralStatus::Pending, true, 2),
            row(ReferralStatus::Reserved, true, 1),
            row(ReferralStatus::Accepted, true, 4),
            row(ReferralStatus::Cancelled, false, 1),
        ]);

        assert_eq!(
            stats,
            ReferralStats {
                total: 11,
                pending: 3,
                reserved: 0,
                accepted: 4,
                expired: 3,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn empty_counts_are_zero() {
        assert_eq!(ReferralStats::from_counts(&[]), ReferralStats::default());
    }
}
