//! # Ledger Entries
//!
//! Append-only records of every balance-affecting event on the device.
//! Entries are never mutated after creation; their timestamp ordering is
//! significant for audit, not for correctness. The authoritative balance
//! is always derived from the active token — the ledger exists so a
//! support engineer (or a regulator) can reconstruct how we got here.
//!
//! Persistence lives in [`crate::storage::OpalDb`]; this module defines
//! the value types and their constructors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// LedgerKind
// ---------------------------------------------------------------------------

/// What kind of balance-affecting event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerKind {
    /// Offline spend: an intent was signed and the ceiling deducted.
    Debit,
    /// Incoming payment accepted from another payer.
    Credit,
    /// A fresh authorization token was stored.
    AuthRefresh,
    /// The backend confirmed settlement of an intent.
    Settlement,
    /// Local remaining balance and backend balance disagreed; both values
    /// are recorded, nothing is corrected silently.
    Reconciliation,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debit => write!(f, "Debit"),
            Self::Credit => write!(f, "Credit"),
            Self::AuthRefresh => write!(f, "AuthRefresh"),
            Self::Settlement => write!(f, "Settlement"),
            Self::Reconciliation => write!(f, "Reconciliation"),
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub id: String,

    /// Event classification.
    pub kind: LedgerKind,

    /// Amount involved, minor units. Zero for events that move no money
    /// (a reconciliation mismatch records its values in `detail`).
    pub amount: u64,

    /// Remaining offline balance after the event, where meaningful.
    pub balance_after: Option<u64>,

    /// The transaction this entry relates to, if any.
    pub txn_id: Option<String>,

    /// Backend settlement reference, for [`LedgerKind::Settlement`].
    pub reference: Option<String>,

    /// Free-form context ("local=100000 backend=98000").
    pub detail: Option<String>,

    /// Unix milliseconds when the entry was appended.
    pub timestamp: u64,
}

impl LedgerEntry {
    fn base(kind: LedgerKind, amount: u64) -> Self {
        Self {
            id: format!("led-{}", Uuid::new_v4()),
            kind,
            amount,
            balance_after: None,
            txn_id: None,
            reference: None,
            detail: None,
            timestamp: Utc::now().timestamp_millis() as u64,
        }
    }

    /// Records an offline spend and the ceiling headroom it left behind.
    pub fn debit(txn_id: &str, amount: u64, balance_after: u64) -> Self {
        let mut entry = Self::base(LedgerKind::Debit, amount);
        entry.txn_id = Some(txn_id.to_string());
        entry.balance_after = Some(balance_after);
        entry
    }

    /// Records an accepted incoming payment.
    pub fn credit(txn_id: &str, amount: u64) -> Self {
        let mut entry = Self::base(LedgerKind::Credit, amount);
        entry.txn_id = Some(txn_id.to_string());
        entry
    }

    /// Records the arrival of a fresh authorization token.
    pub fn auth_refresh(token_id: &str, max_amount: u64) -> Self {
        let mut entry = Self::base(LedgerKind::AuthRefresh, max_amount);
        entry.detail = Some(format!("token={}", token_id));
        entry.balance_after = Some(max_amount);
        entry
    }

    /// Records a backend-confirmed settlement and its reference.
    pub fn settlement(txn_id: &str, amount: u64, reference: &str) -> Self {
        let mut entry = Self::base(LedgerKind::Settlement, amount);
        entry.txn_id = Some(txn_id.to_string());
        entry.reference = Some(reference.to_string());
        entry
    }

    /// Records a balance mismatch between the local token and the
    /// backend. Both values go into `detail`; neither is "corrected".
    pub fn reconciliation(local_remaining: u64, backend_balance: u64) -> Self {
        let mut entry = Self::base(LedgerKind::Reconciliation, 0);
        entry.detail = Some(format!(
            "local={} backend={}",
            local_remaining, backend_balance
        ));
        entry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_carries_balance_and_txn() {
        let entry = LedgerEntry::debit("txn-1", 50_000, 100_000);
        assert_eq!(entry.kind, LedgerKind::Debit);
        assert_eq!(entry.amount, 50_000);
        assert_eq!(entry.balance_after, Some(100_000));
        assert_eq!(entry.txn_id.as_deref(), Some("txn-1"));
        assert!(entry.reference.is_none());
    }

    #[test]
    fn settlement_carries_reference() {
        let entry = LedgerEntry::settlement("txn-1", 50_000, "SETTLE-9f2");
        assert_eq!(entry.kind, LedgerKind::Settlement);
        assert_eq!(entry.reference.as_deref(), Some("SETTLE-9f2"));
    }

    #[test]
    fn reconciliation_records_both_values() {
        let entry = LedgerEntry::reconciliation(100_000, 98_000);
        assert_eq!(entry.kind, LedgerKind::Reconciliation);
        assert_eq!(entry.amount, 0);
        assert_eq!(entry.detail.as_deref(), Some("local=100000 backend=98000"));
    }

    #[test]
    fn entry_ids_are_unique() {
        let a = LedgerEntry::credit("txn-1", 10);
        let b = LedgerEntry::credit("txn-1", 10);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn kind_display() {
        assert_eq!(LedgerKind::Debit.to_string(), "Debit");
        assert_eq!(LedgerKind::Reconciliation.to_string(), "Reconciliation");
    }

    #[test]
    fn entry_serde_roundtrip() {
        let entry = LedgerEntry::auth_refresh("tok-1", 150_000);
        let json = serde_json::to_string(&entry).unwrap();
        let recovered: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, recovered);
    }
}
