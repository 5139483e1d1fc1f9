//! Settlement queue entries and the retry schedule.
//!
//! A [`SettlementQueueEntry`] pairs a signed intent with its retry
//! bookkeeping. Entries are created alongside the intent (inside the same
//! payment transaction), removed on successful settlement, and mutated on
//! failure. Once the owning intent reaches `Failed` the entry is
//! implicitly terminal — it stays in the tree for audit but never
//! re-enters the retry set.

use serde::{Deserialize, Serialize};

use crate::config::{BACKOFF_BASE_MS, BACKOFF_CAP_MS, MAX_SETTLEMENT_ATTEMPTS};
use crate::payment::intent::PaymentIntent;

// ---------------------------------------------------------------------------
// Backoff schedule
// ---------------------------------------------------------------------------

/// Exponential backoff with a one-hour ceiling:
/// `min(1000ms * 2^attempts, 3_600_000ms)`.
///
/// Called with the *already incremented* attempt counter, so the first
/// failure (attempts = 1) waits 2 000 ms, the second 4 000 ms, and so on.
/// The shift is guarded — by attempt 12 we're pinned at the cap anyway,
/// and a `u64` shift past 63 is UB-adjacent territory we don't visit.
pub fn backoff_ms(attempts: u32) -> u64 {
    if attempts >= 22 {
        return BACKOFF_CAP_MS;
    }
    BACKOFF_CAP_MS.min(BACKOFF_BASE_MS << attempts)
}

// ---------------------------------------------------------------------------
// SettlementQueueEntry
// ---------------------------------------------------------------------------

/// One durable work item awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementQueueEntry {
    /// Transaction id, doubling as the queue key.
    pub txn_id: String,

    /// The signed intent to submit.
    pub intent: PaymentIntent,

    /// How many submissions have failed so far.
    pub attempts: u32,

    /// Earliest instant (Unix ms) the next submission may happen.
    pub next_attempt_at: u64,

    /// Human-readable description of the most recent failure.
    pub last_error: Option<String>,
}

impl SettlementQueueEntry {
    /// Creates a fresh entry scheduled for immediate submission.
    pub fn new(intent: PaymentIntent, now_ms: u64) -> Self {
        Self {
            txn_id: intent.txn_id.clone(),
            intent,
            attempts: 0,
            next_attempt_at: now_ms,
            last_error: None,
        }
    }

    /// Records one failed submission: bumps the attempt counter, computes
    /// the next eligible instant from the backoff schedule, and keeps the
    /// error for diagnostics. Transport-level failures and remote-reported
    /// failures go through this same path — a failure that skips the
    /// bookkeeping would retry at full frequency forever.
    pub fn record_failure(&mut self, now_ms: u64, error: &str) {
        self.attempts += 1;
        self.next_attempt_at = now_ms + backoff_ms(self.attempts);
        self.last_error = Some(error.to_string());
    }

    /// Whether the attempt ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_SETTLEMENT_ATTEMPTS
    }

    /// Whether this entry is eligible for submission at `now_ms`:
    /// backoff elapsed, ceiling not reached, owning intent not terminal.
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.is_exhausted() && !self.intent.status.is_terminal() && self.next_attempt_at <= now_ms
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::intent::IntentStatus;

    fn entry(now_ms: u64) -> SettlementQueueEntry {
        let intent = PaymentIntent::new("a@upi", "b@upi", 100, None, "tok", 1, "");
        SettlementQueueEntry::new(intent, now_ms)
    }

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(backoff_ms(1), 2_000);
        assert_eq!(backoff_ms(2), 4_000);
        assert_eq!(backoff_ms(3), 8_000);
        assert_eq!(backoff_ms(10), 1_024_000);
        assert_eq!(backoff_ms(12), 3_600_000);
        assert_eq!(backoff_ms(40), 3_600_000);
        assert_eq!(backoff_ms(u32::MAX), 3_600_000);
    }

    #[test]
    fn fresh_entry_is_due_immediately() {
        let e = entry(1_000);
        assert_eq!(e.attempts, 0);
        assert!(e.is_due(1_000));
        assert!(!e.is_due(999));
    }

    #[test]
    fn record_failure_schedules_backoff() {
        let mut e = entry(0);
        e.record_failure(10_000, "connection reset");

        assert_eq!(e.attempts, 1);
        assert_eq!(e.next_attempt_at, 12_000);
        assert_eq!(e.last_error.as_deref(), Some("connection reset"));
        assert!(!e.is_due(11_999));
        assert!(e.is_due(12_000));
    }

    #[test]
    fn consecutive_failures_follow_schedule() {
        let mut e = entry(0);
        for (k, expected) in [(1u32, 2_000u64), (2, 4_000), (3, 8_000)] {
            e.record_failure(100_000, "remote busy");
            assert_eq!(e.attempts, k);
            assert_eq!(e.next_attempt_at, 100_000 + expected);
        }
    }

    #[test]
    fn exhausted_after_attempt_ceiling() {
        let mut e = entry(0);
        for _ in 0..MAX_SETTLEMENT_ATTEMPTS {
            e.record_failure(0, "down");
        }
        assert!(e.is_exhausted());
        assert!(!e.is_due(u64::MAX));
    }

    #[test]
    fn terminal_intent_is_never_due() {
        let mut e = entry(0);
        e.intent.status = IntentStatus::Failed;
        assert!(!e.is_due(u64::MAX));
    }

    #[test]
    fn entry_serde_roundtrip() {
        let e = entry(42);
        let bytes = bincode::serialize(&e).unwrap();
        let recovered: SettlementQueueEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(e, recovered);
    }
}
