//! The payment intent value type and its canonical signable encoding.
//!
//! A signed [`PaymentIntent`] is functionally equivalent to completed
//! money movement: once the payer's device signs it and deducts from the
//! local ceiling, the payee can treat the payment as made even though no
//! backend has heard about it yet. That is why the struct is immutable
//! after signing — only `status` and `settled_at` may change, and only
//! the settlement worker may change them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::SIGNABLE_DELIMITER;

// ---------------------------------------------------------------------------
// IntentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a payment intent.
///
/// `Created` when signed on the payer's device, `Delivered` once it has
/// crossed the tap boundary, `Settling` while a submission is in flight,
/// and terminally `Settled` or `Failed`. Only the settlement worker moves
/// an intent into a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentStatus {
    /// Signed and persisted locally, not yet handed to a payee.
    Created,
    /// Handed over the physical transport to the payee's device.
    Delivered,
    /// A settlement submission for this intent is in flight.
    Settling,
    /// Confirmed by the backend. Terminal.
    Settled,
    /// Gave up after the retry ceiling. Terminal.
    Failed,
}

impl IntentStatus {
    /// Returns `true` for states no submission will ever move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Delivered => write!(f, "Delivered"),
            Self::Settling => write!(f, "Settling"),
            Self::Settled => write!(f, "Settled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// PaymentIntent
// ---------------------------------------------------------------------------

/// The signed, immutable representation of one offline transfer.
///
/// # Canonical Byte Format
///
/// Signing and verification both operate over [`PaymentIntent::signable_bytes`]:
/// the fields `txn_id, payer_upi, payee_upi, amount, timestamp,
/// auth_token_id, sequence_number`, in that exact order, joined with `|`
/// and encoded as UTF-8. Any deviation — field order, delimiter,
/// encoding — breaks signature compatibility with every device already in
/// the field. Don't.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Globally unique transaction id (`txn-<uuid>`).
    pub txn_id: String,

    /// The payer's routable identity.
    pub payer_upi: String,

    /// The payee's routable identity.
    pub payee_upi: String,

    /// Transfer amount in minor units. Always > 0 for a valid intent.
    pub amount: u64,

    /// Optional free-text note ("groceries").
    pub note: Option<String>,

    /// Unix timestamp in milliseconds at intent creation.
    pub timestamp: u64,

    /// Which authorization token's ceiling this payment drew from.
    pub auth_token_id: String,

    /// Strictly increasing per-device counter, assigned from one global
    /// allocator — not per payee. The receiver's bank uses it to tell a
    /// replayed intent from a new payment.
    pub sequence_number: u64,

    /// The payer's Ed25519 signature over the canonical bytes,
    /// hex-encoded. `None` only between construction and signing.
    pub payer_signature: Option<String>,

    /// The bank's signature over the authorizing token id, hex-encoded.
    /// Carried along so the payee can verify the ceiling was genuine
    /// without any network access.
    pub bank_auth_proof: String,

    /// Lifecycle state. Mutable only by the settlement worker.
    pub status: IntentStatus,

    /// Whether this intent was created without connectivity. Currently
    /// always `true` on the device path; kept for the settlement API.
    pub created_offline: bool,

    /// Backend settlement instant (ms). `None` until `Settled`.
    pub settled_at: Option<u64>,
}

impl PaymentIntent {
    /// Builds an unsigned intent with a fresh transaction id and the
    /// current timestamp.
    pub fn new(
        payer_upi: &str,
        payee_upi: &str,
        amount: u64,
        note: Option<String>,
        auth_token_id: &str,
        sequence_number: u64,
        bank_auth_proof: &str,
    ) -> Self {
        Self {
            txn_id: format!("txn-{}", Uuid::new_v4()),
            payer_upi: payer_upi.to_string(),
            payee_upi: payee_upi.to_string(),
            amount,
            note,
            timestamp: Utc::now().timestamp_millis() as u64,
            auth_token_id: auth_token_id.to_string(),
            sequence_number,
            payer_signature: None,
            bank_auth_proof: bank_auth_proof.to_string(),
            status: IntentStatus::Created,
            created_offline: true,
            settled_at: None,
        }
    }

    /// The canonical byte encoding both signing and verification operate
    /// over. Signature, status, note, and proof fields are excluded —
    /// the signature covers the money movement, not the bookkeeping.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let d = SIGNABLE_DELIMITER;
        format!(
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
            self.txn_id,
            self.payer_upi,
            self.payee_upi,
            self.amount,
            self.timestamp,
            self.auth_token_id,
            self.sequence_number,
        )
        .into_bytes()
    }

    /// Returns `true` once the payer's signature is attached.
    pub fn is_signed(&self) -> bool {
        self.payer_signature.is_some()
    }

    /// Age of the intent relative to `now_ms`, saturating to zero for
    /// clocks that disagree.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
