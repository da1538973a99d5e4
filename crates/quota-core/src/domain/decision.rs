use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ThrottlePolicy;

/// State of a counter right after one atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Remaining lifetime of the window. Zero if the store no longer knows the key.
    pub ttl: Duration,
}

/// Outcome of a single `check_and_increment` call.
///
/// Fixed-window semantics: a client may send up to `limit` hits right before a
/// window boundary and again right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleDecision {
    pub total_hits: u64,
    pub time_to_expire_ms: u64,
    pub is_blocked: bool,
    pub time_to_block_expire_ms: u64,
}

impl ThrottleDecision {
    /// The fail-open decision returned when the store cannot be consulted.
    pub const fn allow_all() -> Self {
        Self {
            total_hits: 0,
            time_to_expire_ms: 0,
            is_blocked: false,
            time_to_block_expire_ms: 0,
        }
    }

    pub fn from_record(record: CounterRecord, policy: &ThrottlePolicy) -> Self {
        let is_blocked = record.count >= policy.limit;
        Self {
            total_hits: record.count,
            time_to_expire_ms: record.ttl.as_millis() as u64,
            is_blocked,
            time_to_block_expire_ms: if is_blocked {
                policy.block_duration.as_millis() as u64
            } else {
                0
            },
        }
    }

    /// Hits left in the window before the limit trips.
    pub fn remaining(&self, limit: u64) -> u64 {
        if self.is_blocked {
            0
        } else {
            limit.saturating_sub(self.total_hits)
        }
    }

    /// Whole seconds a blocked caller should wait, rounded up.
    ///
    /// The counter only drops below the limit once the window lapses, so the
    /// wait is the longer of the block duration and the window remainder.
    pub fn retry_after_secs(&self) -> u64 {
        self.time_to_block_expire_ms
            .max(self.time_to_expire_ms)
            .div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ThrottlePolicy {
        ThrottlePolicy::from_millis("default", 60_000, 3, 5_000).unwrap()
    }

    fn record(count: u64) -> CounterRecord {
        CounterRecord {
            count,
            ttl: Duration::from_millis(59_000),
        }
    }

    #[test]
    fn test_blocks_from_limit_onwards() {
        let policy = policy();

        for count in 1..3 {
            let decision = ThrottleDecision::from_record(record(count), &policy);
            assert!(!decision.is_blocked, "hit {} should pass", count);
            assert_eq!(decision.time_to_block_expire_ms, 0);
        }

        for count in 3..6 {
            let decision = ThrottleDecision::from_record(record(count), &policy);
            assert!(decision.is_blocked, "hit {} should be blocked", count);
            assert_eq!(decision.time_to_block_expire_ms, 5_000);
        }
    }

    #[test]
    fn test_remaining_and_retry_after() {
        let policy = policy();

        let decision = ThrottleDecision::from_record(record(1), &policy);
        assert_eq!(decision.remaining(policy.limit), 2);
        assert_eq!(decision.time_to_expire_ms, 59_000);

        let blocked = ThrottleDecision::from_record(record(4), &policy);
        assert_eq!(blocked.remaining(policy.limit), 0);
        // 59s left in the window outlasts the 5s block.
        assert_eq!(blocked.retry_after_secs(), 59);

        let window_closing = ThrottleDecision::from_record(
            CounterRecord {
                count: 4,
                ttl: Duration::from_millis(1_200),
            },
            &policy,
        );
        assert_eq!(window_closing.retry_after_secs(), 5);

        let no_block = ThrottleDecision {
            total_hits: 4,
            time_to_expire_ms: 1_001,
            is_blocked: true,
            time_to_block_expire_ms: 0,
        };
        assert_eq!(no_block.retry_after_secs(), 2);
    }

    #[test]
    fn test_allow_all_serializes_camel_case() {
        let json = serde_json::to_value(ThrottleDecision::allow_all()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "totalHits": 0,
                "timeToExpireMs": 0,
                "isBlocked": false,
                "timeToBlockExpireMs": 0
            })
        );
    }
}
