//! Abuse gating consulted by the lifecycle engine.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{clock::TimeSource, config::ReferralConfig};

#[async_trait]
pub trait FraudGate: Send + Sync {
    async fn is_blocked(&self, user_id: Uuid) -> bool;

    /// Checks the user's creation budget and, when within it, consumes one
    /// unit of it.
    async fn within_create_budget(&self, user_id: Uuid) -> bool;

    async fn validate_vendor_signature(&self, signature: Option<&str>) -> bool;
}

/// In-process gate: a static block list plus a per-user sliding-window
/// counter. The counter map is shared across requests, so check-and-record
/// happens under one lock.
pub struct SlidingWindowFraudGate {
    blocked: HashSet<Uuid>,
    window: Duration,
    max_per_window: usize,
    min_signature_len: usize,
    actions: Mutex<HashMap<Uuid, VecDeque<OffsetDateTime>>>,
    clock: Arc<dyn TimeSource>,
}

impl SlidingWindowFraudGate {
    pub fn new(config: &ReferralConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            blocked: config.blocked_users.iter().copied().collect(),
            window: Duration::seconds(config.create_window_secs as i64),
            max_per_window: config.max_creates_per_window,
            min_signature_len: config.min_signature_len,
            actions: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl FraudGate for SlidingWindowFraudGate {
    async fn is_blocked(&self, user_id: Uuid) -> bool {
        self.blocked.contains(&user_id)
    }

    async fn within_create_budget(&self, user_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut actions = self.actions.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = actions.entry(user_id).or_default();

        while let Some(oldest) = timestamps.front() {
            if now - *oldest > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_per_window {
            tracing::debug!(%user_id, "create budget exhausted");
            return false;
        }

        timestamps.push_back(now);
        true
    }

    async fn validate_vendor_signature(&self, signature: Option<&str>) -> bool {
        match signature {
            None => true,
            Some(s) => s.is_empty() || s.chars().count() >= self.min_signature_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;

    fn gate(clock: Arc<ManualTimeSource>, blocked: Vec<Uuid>) -> SlidingWindowFraudGate {
        let config = ReferralConfig {
            blocked_users: blocked,
            ..ReferralConfig::default()
        };
        SlidingWindowFraudGate::new(&config, clock)
    }

    #[tokio::test]
    async fn budget_refills_after_window() {
        let clock = Arc::new(ManualTimeSource::default());
        let gate = gate(clock.clone(), vec![]);
        let user = Uuid::new_v4();

        assert!(gate.within_create_budget(user).await);
        assert!(gate.within_create_budget(user).await);
        assert!(!gate.within_create_budget(user).await);

        // Other users have their own budget.
        assert!(gate.within_create_budget(Uuid::new_v4()).await);

        clock.advance(Duration::seconds(11));
        assert!(gate.within_create_budget(user).await);
    }

    #[tokio::test]
    async fn concurrent_checks_never_overspend() {
        let clock = Arc::new(ManualTimeSource::default());
        let gate = Arc::new(gate(clock, vec![]));
        let user = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.within_create_budget(user).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
    }

    #[tokio::test]
    async fn blocked_users_and_signatures() {
        let blocked = Uuid::new_v4();
        let gate = gate(Arc::new(ManualTimeSource::default()), vec![blocked]);

        assert!(gate.is_blocked(blocked).await);
        assert!(!gate.is_blocked(Uuid::new_v4()).await);

        assert!(gate.validate_vendor_signature(None).await);
        assert!(gate.validate_vendor_signature(Some("")).await);
        assert!(gate.validate_vendor_signature(Some("sig-0123456")).await);
        assert!(!gate.validate_vendor_signature(Some("short")).await);
    }
}
