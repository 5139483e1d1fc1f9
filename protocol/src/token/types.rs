//! The authorization token value type.
//!
//! An [`AuthorizationToken`] is the bank saying "this payer may spend up
//! to N minor units offline until time T, and here's my signature to
//! prove I said so." It is the root of trust for every offline payment:
//! the payer's device deducts from it locally, and the payee's device
//! checks the bank's countersignature without ever talking to the bank.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TokenStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an authorization token.
///
/// At most one token is `Active` at any time. Storing a new token demotes
/// every other one to `Expired` in the same write. `Revoked` is only ever
/// set by explicit backend action surfaced through settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStatus {
    /// The sole spendable token.
    Active,
    /// Past its validity window, or superseded by a newer token.
    Expired,
    /// Killed by the bank. Terminal.
    Revoked,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Expired => write!(f, "Expired"),
            Self::Revoked => write!(f, "Revoked"),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorizationToken
// ---------------------------------------------------------------------------

/// A bank-issued spending ceiling for one payer over a bounded window.
///
/// All amounts are integers in minor currency units (paise, cents).
/// `spent_amount` only ever grows; the derived `remaining()` must stay
/// non-negative, which the *caller* of a deduction is responsible for
/// checking inside the same logical transaction as the deduction itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    /// Unique token id, assigned by the bank at issuance.
    pub id: String,

    /// The bank's internal user identifier.
    pub user_id: String,

    /// The payer's routable identity ("payer@bank").
    pub upi_id: String,

    /// Masked account number, display only. Never the full account.
    pub account_id: String,

    /// Ceiling for offline spending, minor units.
    pub max_amount: u64,

    /// Total deducted so far, minor units. Monotonically non-decreasing.
    pub spent_amount: u64,

    /// When the bank issued this token.
    pub issued_at: DateTime<Utc>,

    /// Hard expiry. After this instant the token authorizes nothing.
    pub valid_until: DateTime<Utc>,

    /// The bank's Ed25519 verifying key, hex-encoded. Carried so payees
    /// can check `bank_signature` without a directory lookup.
    pub bank_public_key: String,

    /// The bank's signature over the token id, hex-encoded. This is the
    /// proof-of-authorization every intent carries along as
    /// `bank_auth_proof`.
    pub bank_signature: String,

    /// Lifecycle state.
    pub status: TokenStatus,
}

impl AuthorizationToken {
    /// Headroom left under the ceiling.
    ///
    /// Saturating, because a store that somehow holds `spent > max` must
    /// report zero headroom rather than wrap around to 18 quintillion.
    pub fn remaining(&self) -> u64 {
        self.max_amount.saturating_sub(self.spent_amount)
    }

    /// Whether the validity window has passed at the given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Whether the validity window has passed right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether this token can authorize a payment right now: Active
    /// status and inside the validity window.
    pub fn is_usable(&self) -> bool {
        self.status == TokenStatus::Active && !self.is_expired()
    }

    /// Time left in the validity window, zero if already past it.
    pub fn time_remaining(&self) -> Duration {
        let now = Utc::now();
        if now >= self.valid_until {
            Duration::zero()
        } else {
            self.valid_until - now
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token(max: u64, spent: u64) -> AuthorizationToken {
        AuthorizationToken {
            id: "tok-001".to_string(),
            user_id: "user-1".to_string(),
            upi_id: "payer@upi".to_string(),
            account_id: "XXXX1234".to_string(),
            max_amount: max,
            spent_amount: spent,
            issued_at: Utc::now(),
            valid_until: Utc::now() + Duration::hours(48),
            bank_public_key: String::new(),
            bank_signature: String::new(),
            status: TokenStatus::Active,
        }
    }

    #[test]
    fn remaining_is_max_minus_spent() {
        let token = sample_token(150_000, 50_000);
        assert_eq!(token.remaining(), 100_000);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let token = sample_token(100, 200);
        assert_eq!(token.remaining(), 0);
    }

    #[test]
    fn fresh_token_is_usable() {
        let token = sample_token(1_000, 0);
        assert!(token.is_usable());
        assert!(!token.is_expired());
        assert!(token.time_remaining() > Duration::zero());
    }

    #[test]
    fn expired_token_is_not_usable() {
        let mut token = sample_token(1_000, 0);
        token.valid_until = Utc::now() - Duration::hours(1);
        assert!(token.is_expired());
        assert!(!token.is_usable());
        assert_eq!(token.time_remaining(), Duration::zero());
    }

    #[test]
    fn non_active_status_is_not_usable() {
        let mut token = sample_token(1_000, 0);
        token.status = TokenStatus::Revoked;
        assert!(!token.is_usable());
    }

    #[test]
    fn status_display() {
        assert_eq!(TokenStatus::Active.to_string(), "Active");
        assert_eq!(TokenStatus::Revoked.to_string(), "Revoked");
    }

    #[test]
    fn token_serde_roundtrip() {
        let token = sample_token(150_000, 0);
        let json = serde_json::to_string(&token).unwrap();
        let recovered: AuthorizationToken = serde_json::from_str(&json).unwrap();
        assert_eq!(token, recovered);
    }
}
