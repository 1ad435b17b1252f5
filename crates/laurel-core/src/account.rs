//! Member account state that badge rewards are applied to.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Reward, UserId};

/// The slice of a user's account the engine is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAccount {
    /// The user.
    pub user_id: UserId,

    /// Premium access is active until this instant, if ever granted.
    pub premium_expires_at: Option<DateTime<Utc>>,

    /// Bonus actions granted on top of the daily allowance.
    pub bonus_actions: u64,

    /// Special status shown on the profile (e.g. `verified`).
    pub status_label: Option<String>,

    /// Unlocked features, in unlock order, without duplicates.
    pub unlocked_features: Vec<String>,

    /// When the account was last changed by a reward.
    pub updated_at: DateTime<Utc>,
}

impl MemberAccount {
    /// An account with nothing granted yet.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            premium_expires_at: None,
            bonus_actions: 0,
            status_label: None,
            unlocked_features: Vec::new(),
            updated_at: now,
        }
    }

    /// Whether premium access is active at `now`.
    #[must_use]
    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        self.premium_expires_at.is_some_and(|expires| expires > now)
    }

    /// Whether a feature has been unlocked.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.unlocked_features.iter().any(|f| f == feature)
    }
}

impl Reward {
    /// Apply this reward to an account, returning the new account state.
    ///
    /// Premium days extend an active expiry additively and start from `now`
    /// otherwise. Unlocking an already unlocked feature leaves the set unchanged.
    #[must_use]
    pub fn apply(&self, mut account: MemberAccount, now: DateTime<Utc>) -> MemberAccount {
        match self {
            Self::PremiumDays(days) => {
                let base = account
                    .premium_expires_at
                    .filter(|expires| *expires > now)
                    .unwrap_or(now);
                account.premium_expires_at = Some(base + Duration::days(i64::from(*days)));
            }
            Self::ExtraActions(count) => {
                account.bonus_actions = account.bonus_actions.saturating_add(u64::from(*count));
            }
            Self::StatusLabel(label) => {
                account.status_label = Some(label.clone());
            }
            Self::UnlockFeature(feature) => {
                if !account.has_feature(feature) {
                    account.unlocked_features.push(feature.clone());
                }
            }
        }
        account.updated_at = now;
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn premium_starts_from_now_when_inactive() {
        let account = MemberAccount::new(UserId::generate(), at(1));
        let account = Reward::PremiumDays(7).apply(account, at(1));
        assert_eq!(account.premium_expires_at, Some(at(8)));
        assert!(account.is_premium(at(7)));
    }

    #[test]
    fn premium_extends_active_expiry() {
        let mut account = MemberAccount::new(UserId::generate(), at(1));
        account.premium_expires_at = Some(at(5));
        let account = Reward::PremiumDays(7).apply(account, at(1));
        assert_eq!(account.premium_expires_at, Some(at(12)));
    }

    #[test]
    fn premium_restarts_after_lapse() {
        let mut account = MemberAccount::new(UserId::generate(), at(1));
        account.premium_expires_at = Some(at(2));
        let account = Reward::PremiumDays(3).apply(account, at(10));
        assert_eq!(account.premium_expires_at, Some(at(13)));
    }

    #[test]
    fn extra_actions_accumulate() {
        let account = MemberAccount::new(UserId::generate(), at(1));
        let account = Reward::ExtraActions(100).apply(account, at(1));
        let account = Reward::ExtraActions(50).apply(account, at(2));
        assert_eq!(account.bonus_actions, 150);
    }

    #[test]
    fn features_form_a_set() {
        let account = MemberAccount::new(UserId::generate(), at(1));
        let feature = Reward::UnlockFeature("streak_freeze".into());
        let account = feature.apply(account, at(1));
        let account = feature.apply(account, at(2));
        assert_eq!(account.unlocked_features, vec!["streak_freeze".to_string()]);
    }

    #[test]
    fn status_label_is_overwritten() {
        let account = MemberAccount::new(UserId::generate(), at(1));
        let account = Reward::StatusLabel("verified".into()).apply(account, at(1));
        assert_eq!(account.status_label.as_deref(), Some("verified"));
    }
}
