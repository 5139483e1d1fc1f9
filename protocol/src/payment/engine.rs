//! The payment engine: orchestrates one offline payment end to end.
//!
//! `pay()` is a strict-order validation chain followed by an atomic
//! commit. The ordering is contractual — a caller showing "wrong PIN"
//! when the real problem is an expired token trains users to mistrust
//! the app — and the commit is all-or-nothing: intent construction,
//! signing, deduction, persistence, enqueue, and the ledger debit either
//! all happen or none do.
//!
//! Everything from the token lookup onward runs under the token store's
//! write lock. Two concurrent `pay()` calls against the same ceiling
//! serialize there; without that, both could pass the limit check and
//! jointly overspend.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::LedgerEntry;
use crate::payment::intent::PaymentIntent;
use crate::settlement::queue::SettlementQueueEntry;
use crate::signing::SigningCapability;
use crate::storage::db::{DbError, DbResult, OpalDb};
use crate::token::TokenStore;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A completed offline payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSuccess {
    /// The signed, persisted, queued intent.
    pub intent: PaymentIntent,
    /// Remaining offline ceiling after the deduction, minor units.
    pub new_balance: u64,
}

/// Why a payment was refused. A closed enumeration — every call site is
/// forced to handle each category, and nothing is thrown.
#[derive(Debug, Error)]
pub enum PayError {
    /// The amount is not a positive integer (or the note is oversized).
    /// Callers usually pre-validate; the engine re-validates anyway.
    #[error("invalid payment input")]
    InvalidAmount,

    /// The signing element rejected the PIN. Recoverable by re-entry.
    #[error("PIN verification failed")]
    InvalidPin,

    /// No active authorization token. The user must reconnect and sync.
    #[error("no authorization token available")]
    NoAuthToken,

    /// The active token's validity window has passed.
    #[error("authorization token expired")]
    TokenExpired,

    /// The amount exceeds the token's remaining ceiling.
    #[error("insufficient offline balance: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    /// The signing element failed to produce a signature. Rare; logged.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Local storage failed. Rare; logged; nothing was committed.
    #[error("internal error: {0}")]
    Internal(#[from] DbError),
}

// ---------------------------------------------------------------------------
// PaymentEngine
// ---------------------------------------------------------------------------

/// Orchestrates offline payments against the token store, the signing
/// element, and durable storage.
pub struct PaymentEngine {
    db: OpalDb,
    tokens: Arc<TokenStore>,
    signer: Arc<dyn SigningCapability>,
}

impl PaymentEngine {
    /// Creates an engine over the given collaborators.
    pub fn new(db: OpalDb, tokens: Arc<TokenStore>, signer: Arc<dyn SigningCapability>) -> Self {
        Self { db, tokens, signer }
    }

    /// Authorizes and records one offline payment.
    ///
    /// Steps, in strict order, short-circuiting on first failure with no
    /// partial effect:
    ///
    /// 1. Amount validity.
    /// 2. PIN verification.
    /// 3. Active-token lookup.
    /// 4. Expiry check.
    /// 5. Limit check.
    /// 6. Intent construction (global sequence number, txn id, canonical
    ///    signable bytes).
    /// 7. Signing.
    /// 8–11. Deduction, persistence, enqueue, ledger debit — one write
    ///    transaction.
    pub fn pay(
        &self,
        payee_upi: &str,
        amount: u64,
        note: Option<String>,
        pin: &str,
    ) -> Result<PaymentSuccess, PayError> {
        // 1. Positive integer amount, bounded note. Generic input error —
        //    the UI already told the user what's wrong with the field.
        if amount == 0 {
            return Err(PayError::InvalidAmount);
        }
        if note.as_deref().is_some_and(|n| n.len() > crate::config::MAX_NOTE_LENGTH) {
            return Err(PayError::InvalidAmount);
        }
        if payee_upi.is_empty() || payee_upi.len() > crate::config::MAX_UPI_ID_LENGTH {
            return Err(PayError::InvalidAmount);
        }

        // 2. PIN before anything token-related: a wrong PIN learns
        //    nothing about the wallet's state.
        if !self.signer.verify_pin(pin) {
            return Err(PayError::InvalidPin);
        }

        // 3–11 under the token store's write lock.
        let outcome = self.tokens.with_active_token(|token| {
            // 4. Expiry.
            if token.is_expired() {
                return Ok(Err(PayError::TokenExpired));
            }

            // 5. Limit. Checked here, inside the same critical section
            //    as the deduction — never trust a check made outside it.
            let available = token.remaining();
            if amount > available {
                return Ok(Err(PayError::InsufficientFunds {
                    requested: amount,
                    available,
                }));
            }

            // 6. Construct the intent with the next global sequence
            //    number. The allocator is crash-consistent; a failure
            //    here burns a sequence value, which is harmless.
            let sequence = self.db.next_sequence()?;
            let mut intent = PaymentIntent::new(
                &token.upi_id,
                payee_upi,
                amount,
                note,
                &token.id,
                sequence,
                &token.bank_signature,
            );

            // 7. Sign. Nothing has been written yet, so a signing
            //    failure leaves no trace to clean up.
            let signature = match self.signer.sign(&intent.signable_bytes()) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!(txn_id = %intent.txn_id, error = %e, "signing element refused to sign");
                    return Ok(Err(PayError::SigningFailed(e.to_string())));
                }
            };
            intent.payer_signature = Some(hex::encode(signature));

            // 8–11. One transaction: deducted token, signed intent,
            // queue entry (attempts=0, due immediately), ledger debit.
            let mut deducted = token;
            deducted.spent_amount = deducted.spent_amount.saturating_add(amount);
            let new_balance = deducted.remaining();

            let now_ms = Utc::now().timestamp_millis() as u64;
            let entry = SettlementQueueEntry::new(intent.clone(), now_ms);
            let debit = LedgerEntry::debit(&intent.txn_id, amount, new_balance);

            self.db.commit_payment(&deducted, &intent, &entry, &debit)?;

            info!(
                txn_id = %intent.txn_id,
                payee = %intent.payee_upi,
                amount,
                new_balance,
                sequence,
                "offline payment authorized"
            );

            Ok(Ok(PaymentSuccess {
                intent,
                new_balance,
            }))
        })?;

        match outcome {
            None => Err(PayError::NoAuthToken),
            Some(result) => result,
        }
    }

    /// Headroom left under the active ceiling (UI query).
    pub fn remaining_balance(&self) -> DbResult<u64> {
        self.tokens.remaining_balance()
    }

    /// Number of payments still awaiting settlement (UI query).
    pub fn pending_payments(&self) -> DbResult<usize> {
        self.db.pending_queue_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerKind;
    use crate::payment::intent::IntentStatus;
    use crate::signing::{DeviceKeypair, DeviceVault, SigningError};
    use crate::token::types::{AuthorizationToken, TokenStatus};
    use chrono::Duration;

    const PIN: &str = "4321";

    struct Rig {
        engine: PaymentEngine,
        tokens: Arc<TokenStore>,
        db: OpalDb,
    }

    fn rig() -> Rig {
        let db = OpalDb::open_temporary().unwrap();
        let tokens = Arc::new(TokenStore::new(db.clone()));
        let bank = DeviceKeypair::generate();
        let vault = DeviceVault::new(DeviceKeypair::generate(), PIN, bank.verifying_key());
        let engine = PaymentEngine::new(db.clone(), tokens.clone(), Arc::new(vault));
        Rig { engine, tokens, db }
    }

    fn token(max: u64) -> AuthorizationToken {
        AuthorizationToken {
            id: "tok-1".to_string(),
            user_id: "user-1".to_string(),
            upi_id: "payer@upi".to_string(),
            account_id: "XXXX1234".to_string(),
            max_amount: max,
            spent_amount: 0,
            issued_at: Utc::now(),
            valid_until: Utc::now() + Duration::hours(48),
            bank_public_key: String::new(),
            bank_signature: "aabb".to_string(),
            status: TokenStatus::Active,
        }
    }

    #[test]
    fn successful_payment_scenario() {
        let r = rig();
        r.tokens.store_token(&token(150_000)).unwrap();

        let success = r
            .engine
            .pay("shop@upi", 50_000, Some("groceries".into()), PIN)
            .unwrap();

        assert_eq!(success.new_balance, 100_000);
        assert_eq!(success.intent.status, IntentStatus::Created);
        assert_eq!(success.intent.payer_upi, "payer@upi");
        assert_eq!(success.intent.sequence_number, 1);
        assert!(success.intent.is_signed());

        // Exactly one queue entry, due immediately.
        let queue = r.db.queue_entries().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].attempts, 0);
        assert_eq!(r.engine.pending_payments().unwrap(), 1);

        // Exactly one debit in the ledger.
        let ledger = r.db.ledger_entries().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerKind::Debit);
        assert_eq!(ledger[0].amount, 50_000);
        assert_eq!(ledger[0].balance_after, Some(100_000));

        // Token deducted.
        assert_eq!(r.engine.remaining_balance().unwrap(), 100_000);
    }

    #[test]
    fn zero_amount_rejected_before_pin() {
        let r = rig();
        // PIN is wrong too, but amount validation comes first.
        assert!(matches!(
            r.engine.pay("shop@upi", 0, None, "bad"),
            Err(PayError::InvalidAmount)
        ));
    }

    #[test]
    fn wrong_pin_rejected_before_token_lookup() {
        let r = rig();
        // No token stored; a wrong PIN must still report InvalidPin,
        // not NoAuthToken — PIN comes first in the chain.
        assert!(matches!(
            r.engine.pay("shop@upi", 100, None, "0000"),
            Err(PayError::InvalidPin)
        ));
    }

    #[test]
    fn missing_token_reported() {
        let r = rig();
        assert!(matches!(
            r.engine.pay("shop@upi", 100, None, PIN),
            Err(PayError::NoAuthToken)
        ));
    }

    #[test]
    fn expired_token_leaves_state_untouched() {
        let r = rig();
        let mut t = token(150_000);
        t.valid_until = Utc::now() - Duration::hours(1);
        r.tokens.store_token(&t).unwrap();

        assert!(matches!(
            r.engine.pay("shop@upi", 100, None, PIN),
            Err(PayError::TokenExpired)
        ));

        let stored = r.db.get_token("tok-1").unwrap().unwrap();
        assert_eq!(stored.spent_amount, 0);
        assert!(r.db.queue_entries().unwrap().is_empty());
        assert_eq!(r.db.ledger_len(), 0);
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let r = rig();
        r.tokens.store_token(&token(150_000)).unwrap();

        let err = r.engine.pay("shop@upi", 200_000, None, PIN);
        match err {
            Err(PayError::InsufficientFunds {
                requested,
                available,
            }) => {
                assert_eq!(requested, 200_000);
                assert_eq!(available, 150_000);
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }

        assert_eq!(r.db.get_token("tok-1").unwrap().unwrap().spent_amount, 0);
        assert!(r.db.queue_entries().unwrap().is_empty());
        assert_eq!(r.db.ledger_len(), 0);
        // No sequence number burned by a limit failure.
        assert_eq!(r.db.current_sequence().unwrap(), 0);
    }

    #[test]
    fn sequence_numbers_increase_across_payments() {
        let r = rig();
        r.tokens.store_token(&token(150_000)).unwrap();

        let a = r.engine.pay("shop@upi", 10_000, None, PIN).unwrap();
        let b = r.engine.pay("cafe@upi", 20_000, None, PIN).unwrap();
        let c = r.engine.pay("shop@upi", 30_000, None, PIN).unwrap();

        assert_eq!(a.intent.sequence_number, 1);
        assert_eq!(b.intent.sequence_number, 2);
        assert_eq!(c.intent.sequence_number, 3);
        assert_eq!(c.new_balance, 90_000);
        assert_eq!(r.engine.pending_payments().unwrap(), 3);
    }

    #[test]
    fn signature_verifies_against_device_key() {
        let db = OpalDb::open_temporary().unwrap();
        let tokens = Arc::new(TokenStore::new(db.clone()));
        let bank = DeviceKeypair::generate();
        let device = DeviceKeypair::generate();
        let vault = Arc::new(DeviceVault::new(device.clone(), PIN, bank.verifying_key()));
        let engine = PaymentEngine::new(db, tokens.clone(), vault);

        tokens.store_token(&token(150_000)).unwrap();
        let success = engine.pay("shop@upi", 1_000, None, PIN).unwrap();

        let sig = hex::decode(success.intent.payer_signature.as_ref().unwrap()).unwrap();
        assert!(device.verify(&success.intent.signable_bytes(), &sig));
    }

    #[test]
    fn signing_failure_commits_nothing() {
        struct RefusingSigner;
        impl SigningCapability for RefusingSigner {
            fn verify_pin(&self, _pin: &str) -> bool {
                true
            }
            fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, SigningError> {
                Err(SigningError::SigningFailed)
            }
            fn verify_payer_signature(&self, _data: &[u8], _sig: &[u8]) -> bool {
                false
            }
            fn verify_bank_signature(&self, _token_id: &str, _sig: &[u8]) -> bool {
                false
            }
            fn public_key_hex(&self) -> String {
                String::new()
            }
        }

        let db = OpalDb::open_temporary().unwrap();
        let tokens = Arc::new(TokenStore::new(db.clone()));
        let engine = PaymentEngine::new(db.clone(), tokens.clone(), Arc::new(RefusingSigner));
        tokens.store_token(&token(150_000)).unwrap();

        assert!(matches!(
            engine.pay("shop@upi", 100, None, "anything"),
            Err(PayError::SigningFailed(_))
        ));
        assert_eq!(db.get_token("tok-1").unwrap().unwrap().spent_amount, 0);
        assert!(db.queue_entries().unwrap().is_empty());
        assert_eq!(db.ledger_len(), 0);
    }

    #[test]
    fn oversized_note_rejected() {
        let r = rig();
        r.tokens.store_token(&token(150_000)).unwrap();
        let huge = "x".repeat(crate::config::MAX_NOTE_LENGTH + 1);
        assert!(matches!(
            r.engine.pay("shop@upi", 100, Some(huge), PIN),
            Err(PayError::InvalidAmount)
        ));
    }
}
