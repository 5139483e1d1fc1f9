//! The token store: owner of the single currently-active authorization
//! token.
//!
//! The active token is process-wide shared mutable state, and the gap
//! between "check the remaining ceiling" and "apply the deduction" is
//! exactly where a lost-update race would let a payer double-spend. The
//! store therefore carries a mutex, and [`TokenStore::with_active_token`]
//! lets the payment engine run its entire check-then-deduct-then-commit
//! sequence under one guard.
//!
//! Policy note: `deduct_amount` does NOT validate `amount <= remaining`.
//! That precondition belongs to the caller, inside the same critical
//! section — validating it here as well would paper over callers that
//! check outside the lock and hide the race instead of fixing it.

use chrono::Duration;
use parking_lot::Mutex;
use tracing::info;

use crate::storage::db::{DbError, DbResult, OpalDb};
use crate::token::types::{AuthorizationToken, TokenStatus};

/// Owns the single active authorization token.
///
/// All mutations go through the internal mutex; reads of derived values
/// (`remaining_balance`, `has_valid_token`) are lock-free snapshots and
/// may be momentarily stale, which is fine for display but not for
/// spending — spending paths use [`Self::with_active_token`].
pub struct TokenStore {
    db: OpalDb,
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Creates a store over the given database.
    pub fn new(db: OpalDb) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// The token with status Active whose validity window has not passed.
    /// No implicit fallback: an expired-but-still-marked-Active token
    /// yields `None`.
    pub fn get_active_token(&self) -> DbResult<Option<AuthorizationToken>> {
        let Some(id) = self.db.active_token_id()? else {
            return Ok(None);
        };
        let Some(token) = self.db.get_token(&id)? else {
            return Ok(None);
        };
        if token.status == TokenStatus::Active && !token.is_expired() {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Stores `token` as the sole Active one, demoting all others to
    /// Expired in a single atomic write. Partial application — a window
    /// with zero or two active tokens — cannot happen.
    pub fn store_token(&self, token: &AuthorizationToken) -> DbResult<()> {
        let _guard = self.write_lock.lock();
        self.db.store_token_exclusive(token)?;
        info!(
            token_id = %token.id,
            max_amount = token.max_amount,
            valid_until = %token.valid_until,
            "stored new authorization token"
        );
        Ok(())
    }

    /// Adds `amount` to the token's `spent_amount`.
    ///
    /// Precondition (enforced by the caller, not here): `amount` does not
    /// exceed the token's remaining ceiling, checked inside the same
    /// critical section as this call.
    pub fn deduct_amount(&self, token_id: &str, amount: u64) -> DbResult<()> {
        let _guard = self.write_lock.lock();
        let mut token = self
            .db
            .get_token(token_id)?
            .ok_or_else(|| DbError::NotFound(format!("token {}", token_id)))?;
        token.spent_amount = token.spent_amount.saturating_add(amount);
        self.db.put_token(&token)
    }

    /// Runs `f` with the active token under the store's write lock.
    ///
    /// This is the spending-path primitive: the limit check, the
    /// deduction, and the durable commit all happen inside `f` while no
    /// other writer can touch the token. Returns `Ok(None)` when no
    /// Active-status token exists at all; expiry is NOT checked here,
    /// because the engine distinguishes "no token" from "expired token"
    /// in its own step order.
    pub fn with_active_token<T>(
        &self,
        f: impl FnOnce(AuthorizationToken) -> DbResult<T>,
    ) -> DbResult<Option<T>> {
        let _guard = self.write_lock.lock();
        let Some(id) = self.db.active_token_id()? else {
            return Ok(None);
        };
        let Some(token) = self.db.get_token(&id)? else {
            return Ok(None);
        };
        if token.status != TokenStatus::Active {
            return Ok(None);
        }
        f(token).map(Some)
    }

    /// Headroom left under the active ceiling; 0 when no usable token.
    pub fn remaining_balance(&self) -> DbResult<u64> {
        Ok(self
            .get_active_token()?
            .map(|t| t.remaining())
            .unwrap_or(0))
    }

    /// Whether a usable (Active, unexpired) token exists.
    pub fn has_valid_token(&self) -> DbResult<bool> {
        Ok(self.get_active_token()?.is_some())
    }

    /// Time left in the active token's validity window; zero when none.
    pub fn time_remaining(&self) -> DbResult<Duration> {
        Ok(self
            .get_active_token()?
            .map(|t| t.time_remaining())
            .unwrap_or_else(Duration::zero))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn token(id: &str, max: u64) -> AuthorizationToken {
        AuthorizationToken {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            upi_id: "payer@upi".to_string(),
            account_id: "XXXX1234".to_string(),
            max_amount: max,
            spent_amount: 0,
            issued_at: Utc::now(),
            valid_until: Utc::now() + Duration::hours(48),
            bank_public_key: String::new(),
            bank_signature: String::new(),
            status: TokenStatus::Active,
        }
    }

    fn store() -> TokenStore {
        TokenStore::new(OpalDb::open_temporary().unwrap())
    }

    #[test]
    fn empty_store_has_no_active_token() {
        let s = store();
        assert!(s.get_active_token().unwrap().is_none());
        assert!(!s.has_valid_token().unwrap());
        assert_eq!(s.remaining_balance().unwrap(), 0);
        assert_eq!(s.time_remaining().unwrap(), Duration::zero());
    }

    #[test]
    fn stored_token_becomes_active() {
        let s = store();
        s.store_token(&token("tok-1", 150_000)).unwrap();

        let active = s.get_active_token().unwrap().unwrap();
        assert_eq!(active.id, "tok-1");
        assert_eq!(s.remaining_balance().unwrap(), 150_000);
        assert!(s.has_valid_token().unwrap());
        assert!(s.time_remaining().unwrap() > Duration::zero());
    }

    #[test]
    fn newest_token_wins_and_earlier_report_expired() {
        let s = store();
        s.store_token(&token("tok-1", 100)).unwrap();
        s.store_token(&token("tok-2", 200)).unwrap();
        s.store_token(&token("tok-3", 300)).unwrap();

        assert_eq!(s.get_active_token().unwrap().unwrap().id, "tok-3");
        assert_eq!(s.remaining_balance().unwrap(), 300);
    }

    #[test]
    fn expired_active_token_is_not_returned() {
        let s = store();
        let mut t = token("tok-1", 100);
        t.valid_until = Utc::now() - Duration::hours(1);
        s.store_token(&t).unwrap();

        assert!(s.get_active_token().unwrap().is_none());
        assert!(!s.has_valid_token().unwrap());
    }

    #[test]
    fn deduction_reduces_remaining() {
        let s = store();
        s.store_token(&token("tok-1", 150_000)).unwrap();
        s.deduct_amount("tok-1", 50_000).unwrap();

        let active = s.get_active_token().unwrap().unwrap();
        assert_eq!(active.spent_amount, 50_000);
        assert_eq!(active.remaining(), 100_000);
    }

    #[test]
    fn deduction_on_missing_token_errors() {
        let s = store();
        assert!(matches!(
            s.deduct_amount("nope", 1),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn with_active_token_yields_none_when_empty() {
        let s = store();
        let ran = s.with_active_token(|_| Ok(())).unwrap();
        assert!(ran.is_none());
    }

    #[test]
    fn with_active_token_passes_current_state() {
        let s = store();
        s.store_token(&token("tok-1", 150_000)).unwrap();
        s.deduct_amount("tok-1", 10).unwrap();

        let seen = s
            .with_active_token(|t| Ok(t.spent_amount))
            .unwrap()
            .unwrap();
        assert_eq!(seen, 10);
    }
}
