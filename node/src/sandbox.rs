//! # Sandbox Settlement Backend
//!
//! An in-memory stand-in for the bank's settlement API, good enough to
//! soak the whole pipeline locally: it issues bank-signed tokens, keeps
//! its own authoritative balance, and acknowledges submissions with
//! generated references. Optionally rejects the first N submissions so
//! the retry schedule can be watched in the logs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use opal_protocol::payment::PaymentIntent;
use opal_protocol::settlement::{SettlementAck, SettlementApi, SubmitFailure};
use opal_protocol::signing::DeviceKeypair;
use opal_protocol::token::{issue_token, AuthorizationToken};

/// Identity of the sandbox wallet holder, baked into issued tokens.
const SANDBOX_USER: &str = "sandbox-user";
const SANDBOX_UPI: &str = "sandbox@opal";
const SANDBOX_ACCOUNT: &str = "XXXX0001";

/// Validity window the sandbox bank grants per token.
const TOKEN_VALIDITY_HOURS: i64 = 48;

/// In-memory settlement backend for local runs.
pub struct SandboxApi {
    bank: DeviceKeypair,
    ceiling: u64,
    /// The bank's authoritative view of the remaining offline balance.
    balance: AtomicU64,
    /// Transaction ids already settled, for idempotent resubmission.
    settled: Mutex<Vec<String>>,
    /// Submissions left to reject before behaving.
    fail_remaining: AtomicU32,
}

impl SandboxApi {
    /// Creates a backend granting `ceiling` per token, rejecting the
    /// first `fail_first` submissions with a retryable failure.
    pub fn new(bank: DeviceKeypair, ceiling: u64, fail_first: u32) -> Self {
        Self {
            bank,
            ceiling,
            balance: AtomicU64::new(ceiling),
            settled: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(fail_first),
        }
    }
}

#[async_trait]
impl SettlementApi for SandboxApi {
    async fn submit_payment_intent(
        &self,
        intent: &PaymentIntent,
    ) -> Result<SettlementAck, SubmitFailure> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SubmitFailure::retryable("sandbox: simulated outage"));
        }

        let mut settled = self.settled.lock().await;
        let settled_at = Utc::now().timestamp_millis() as u64;
        if settled.contains(&intent.txn_id) {
            // Idempotent resubmission (e.g. after a timed-out first
            // attempt that actually landed).
            debug!(txn_id = %intent.txn_id, "duplicate submission acknowledged");
            return Ok(SettlementAck {
                reference: format!("SB-DUP-{}", &intent.txn_id),
                settled_at,
            });
        }

        settled.push(intent.txn_id.clone());
        let remaining = self
            .balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| {
                Some(b.saturating_sub(intent.amount))
            })
            .unwrap_or(0)
            .saturating_sub(intent.amount);

        let reference = format!("SB-{}", Uuid::new_v4().simple());
        info!(txn_id = %intent.txn_id, amount = intent.amount, %reference, remaining, "sandbox settled");
        Ok(SettlementAck {
            reference,
            settled_at,
        })
    }

    async fn refresh_auth_token(
        &self,
        current_token_id: Option<&str>,
    ) -> Result<Option<AuthorizationToken>, SubmitFailure> {
        let token = issue_token(
            &self.bank,
            SANDBOX_USER,
            SANDBOX_UPI,
            SANDBOX_ACCOUNT,
            self.ceiling,
            Duration::hours(TOKEN_VALIDITY_HOURS),
        );
        // A fresh ceiling supersedes whatever the old token had left.
        self.balance.store(self.ceiling, Ordering::SeqCst);
        info!(
            token_id = %token.id,
            superseding = ?current_token_id,
            ceiling = self.ceiling,
            "sandbox issued fresh token"
        );
        Ok(Some(token))
    }

    async fn get_balance(&self) -> Result<u64, SubmitFailure> {
        Ok(self.balance.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(amount: u64) -> PaymentIntent {
        PaymentIntent::new(SANDBOX_UPI, "shop@upi", amount, None, "tok-1", 1, "")
    }

    #[tokio::test]
    async fn settles_and_tracks_balance() {
        let api = SandboxApi::new(DeviceKeypair::generate(), 150_000, 0);
        let ack = api.submit_payment_intent(&intent(50_000)).await.unwrap();
        assert!(ack.reference.starts_with("SB-"));
        assert_eq!(api.get_balance().await.unwrap(), 100_000);
    }

    #[tokio::test]
    async fn rejects_first_n_submissions() {
        let api = SandboxApi::new(DeviceKeypair::generate(), 150_000, 2);
        assert!(api.submit_payment_intent(&intent(10)).await.is_err());
        assert!(api.submit_payment_intent(&intent(10)).await.is_err());
        assert!(api.submit_payment_intent(&intent(10)).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_submission_does_not_double_deduct() {
        let api = SandboxApi::new(DeviceKeypair::generate(), 150_000, 0);
        let i = intent(50_000);
        api.submit_payment_intent(&i).await.unwrap();
        let dup = api.submit_payment_intent(&i).await.unwrap();
        assert!(dup.reference.starts_with("SB-DUP-"));
        assert_eq!(api.get_balance().await.unwrap(), 100_000);
    }

    #[tokio::test]
    async fn refresh_issues_token_and_resets_balance() {
        let api = SandboxApi::new(DeviceKeypair::generate(), 150_000, 0);
        api.submit_payment_intent(&intent(50_000)).await.unwrap();

        let token = api.refresh_auth_token(None).await.unwrap().unwrap();
        assert_eq!(token.max_amount, 150_000);
        assert_eq!(token.upi_id, SANDBOX_UPI);
        assert_eq!(api.get_balance().await.unwrap(), 150_000);
    }
}
