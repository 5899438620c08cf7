use chrono::{DateTime, Duration, Utc};

use crate::config::ExpiryConfig;

/// Decides when an image is old enough to be purged.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// How long a never used image is kept after creation.
    pub unused_grace: Duration,

    /// How long an image is kept after its last use.
    pub stale_after: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            unused_grace: Duration::days(7),
            stale_after: Duration::days(30),
        }
    }
}

impl From<&ExpiryConfig> for RetentionPolicy {
    fn from(cfg: &ExpiryConfig) -> Self {
        Self {
            unused_grace: Duration::days(cfg.unused_grace_days as i64),
            stale_after: Duration::days(cfg.stale_after_days as i64),
        }
    }
}

/// The two timestamps a sweep compares against.
#[derive(Debug, Clone, Copy)]
pub struct Cutoffs {
    pub created_before: DateTime<Utc>,
    pub used_before: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn cutoffs(&self, now: DateTime<Utc>) -> Cutoffs {
        Cutoffs {
            created_before: now - self.unused_grace,
            used_before: now - self.stale_after,
        }
    }

    pub fn is_expired(
        &self,
        date_created: DateTime<Utc>,
        date_used: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let cutoffs = self.cutoffs(now);
        match date_used {
            None => date_created < cutoffs.created_before,
            Some(used) => used < cutoffs.used_before,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_images_expire_after_a_week() {
        let policy = RetentionPolicy::default();
        let now = Utc::now();

        assert!(policy.is_expired(now - Duration::days(8), None, now));
        assert!(!policy.is_expired(now - Duration::days(6), None, now));
    }

    #[test]
    fn used_images_expire_after_a_month_of_idling() {
        let policy = RetentionPolicy::default();
        let now = Utc::now();
        let created = now - Duration::days(90);

        assert!(!policy.is_expired(created, Some(now - Duration::days(29)), now));
        assert!(policy.is_expired(created, Some(now - Duration::days(31)), now));
    }
}
