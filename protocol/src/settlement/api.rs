//! The remote settlement API contract.
//!
//! The backend is an external collaborator — this crate only defines the
//! seam. Implementations translate whatever transport they use (HTTPS,
//! gRPC, a sandbox loopback) into these types. One rule is non-negotiable:
//! transport-level failures must surface as a retryable [`SubmitFailure`],
//! not vanish into a log line, or the worker's retry bookkeeping breaks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::payment::intent::PaymentIntent;
use crate::token::types::AuthorizationToken;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A successful settlement acknowledgement from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAck {
    /// The backend's settlement reference, recorded in the ledger.
    pub reference: String,

    /// Backend settlement instant, Unix milliseconds.
    pub settled_at: u64,
}

/// A failed settlement submission.
///
/// `retryable = false` means the backend has definitively rejected the
/// intent (bad signature, revoked token); the worker still walks the
/// normal attempt bookkeeping so the failure is visible in the entry,
/// but implementations should expect no different answer on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFailure {
    /// Human-readable reason, recorded as the entry's `last_error`.
    pub reason: String,

    /// Whether a later attempt could plausibly succeed.
    pub retryable: bool,
}

impl SubmitFailure {
    /// A transient failure worth retrying (network blips, 5xx, timeouts).
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A definitive rejection.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SettlementApi
// ---------------------------------------------------------------------------

/// The backend surface the settlement worker drives.
#[async_trait]
pub trait SettlementApi: Send + Sync {
    /// Submits one signed intent for settlement. Implementations must map
    /// transport errors into a retryable [`SubmitFailure`] rather than
    /// panicking or swallowing them.
    async fn submit_payment_intent(
        &self,
        intent: &PaymentIntent,
    ) -> Result<SettlementAck, SubmitFailure>;

    /// Requests a fresh authorization token, keyed by the current token's
    /// id when one exists. `Ok(None)` means the backend declined to issue
    /// one right now (not an error — the old token stays usable).
    async fn refresh_auth_token(
        &self,
        current_token_id: Option<&str>,
    ) -> Result<Option<AuthorizationToken>, SubmitFailure>;

    /// The backend's authoritative view of the payer's offline balance,
    /// minor units.
    async fn get_balance(&self) -> Result<u64, SubmitFailure>;
}
