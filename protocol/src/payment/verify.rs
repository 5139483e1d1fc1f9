//! Independent verification of incoming payment intents.
//!
//! The payee's device runs this on every intent that arrives over the
//! tap boundary, before showing "payment received". No network access is
//! assumed: the bank proof check uses the provisioned bank key inside the
//! signing element, and the payer's key comes from a local directory.
//!
//! The checks run in a fixed order and stop at the first failure. Order
//! matters for the caller's messaging: a forged bank proof and a stale
//! timestamp call for very different screens.

use chrono::Utc;
use ed25519_dalek::VerifyingKey;

use crate::config::INCOMING_FRESHNESS_WINDOW_MS;
use crate::payment::intent::PaymentIntent;
use crate::signing::{verify_with_key, SigningCapability};

// ---------------------------------------------------------------------------
// PayerKeyDirectory
// ---------------------------------------------------------------------------

/// Resolves a payer identity to their Ed25519 verifying key.
///
/// How the directory is populated is outside this crate — provisioned key
/// bundles, a prior online exchange, or a key carried inside a richer
/// token format all work. An unknown payer is a verification failure, not
/// an excuse to skip the signature check.
pub trait PayerKeyDirectory: Send + Sync {
    /// The verifying key registered for `payer_upi`, if any.
    fn verifying_key(&self, payer_upi: &str) -> Option<VerifyingKey>;
}

// ---------------------------------------------------------------------------
// Verdict types
// ---------------------------------------------------------------------------

/// Why an incoming intent was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// The bank authorization proof did not verify against the
    /// provisioned bank key (or was not valid hex).
    BadBankProof,
    /// The intent carries no payer signature.
    Unsigned,
    /// No verifying key is known for the claimed payer identity.
    UnknownPayer,
    /// The payer signature did not verify over the canonical bytes.
    BadPayerSignature,
    /// The intent is older than the acceptance window.
    Stale,
    /// The amount is zero.
    NonPositiveAmount,
}

/// Outcome of verifying an incoming intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingVerdict {
    /// All checks passed; the fields a receipt screen needs.
    Valid {
        txn_id: String,
        payer_upi: String,
        amount: u64,
        note: Option<String>,
    },
    /// The first check that failed.
    Invalid(InvalidReason),
}

impl IncomingVerdict {
    /// Returns `true` for [`IncomingVerdict::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

// ---------------------------------------------------------------------------
// verify_incoming_payment
// ---------------------------------------------------------------------------

/// Verifies an incoming intent on the payee's device.
///
/// Checks, in order:
///
/// 1. The bank authorization proof verifies over the token id.
/// 2. The payer's signature verifies over the canonical bytes, using the
///    key the directory holds for the claimed payer.
/// 3. The intent is no older than the acceptance window.
/// 4. The amount is positive.
///
/// Total over arbitrary input: malformed hex, unknown identities, and
/// clock skew all produce an [`IncomingVerdict::Invalid`], never a panic.
pub fn verify_incoming_payment(
    intent: &PaymentIntent,
    signer: &dyn SigningCapability,
    keys: &dyn PayerKeyDirectory,
) -> IncomingVerdict {
    // 1. Bank proof first: a payment drawn from a ceiling the bank never
    //    granted is worthless no matter how well it is signed.
    let Ok(proof) = hex::decode(&intent.bank_auth_proof) else {
        return IncomingVerdict::Invalid(InvalidReason::BadBankProof);
    };
    if !signer.verify_bank_signature(&intent.auth_token_id, &proof) {
        return IncomingVerdict::Invalid(InvalidReason::BadBankProof);
    }

    // 2. Payer signature over the canonical bytes.
    let Some(sig_hex) = intent.payer_signature.as_deref() else {
        return IncomingVerdict::Invalid(InvalidReason::Unsigned);
    };
    let Ok(signature) = hex::decode(sig_hex) else {
        return IncomingVerdict::Invalid(InvalidReason::BadPayerSignature);
    };
    let Some(payer_key) = keys.verifying_key(&intent.payer_upi) else {
        return IncomingVerdict::Invalid(InvalidReason::UnknownPayer);
    };
    if !verify_with_key(&payer_key, &intent.signable_bytes(), &signature) {
        return IncomingVerdict::Invalid(InvalidReason::BadPayerSignature);
    }

    // 3. Freshness. Future-dated intents have age zero (clock skew
    //    between two offline devices is expected, not suspicious).
    let now_ms = Utc::now().timestamp_millis() as u64;
    if intent.age_ms(now_ms) > INCOMING_FRESHNESS_WINDOW_MS {
        return IncomingVerdict::Invalid(InvalidReason::Stale);
    }

    // 4. Amount.
    if intent.amount == 0 {
        return IncomingVerdict::Invalid(InvalidReason::NonPositiveAmount);
    }

    IncomingVerdict::Valid {
        txn_id: intent.txn_id.clone(),
        payer_upi: intent.payer_upi.clone(),
        amount: intent.amount,
        note: intent.note.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{DeviceKeypair, DeviceVault};
    use std::collections::HashMap;

    struct MapDirectory(HashMap<String, VerifyingKey>);

    impl PayerKeyDirectory for MapDirectory {
        fn verifying_key(&self, payer_upi: &str) -> Option<VerifyingKey> {
            self.0.get(payer_upi).copied()
        }
    }

    struct Fixture {
        vault: DeviceVault,
        keys: MapDirectory,
        intent: PaymentIntent,
    }

    /// A payee-side fixture: a vault provisioned with the bank key, a
    /// directory knowing the payer, and a fully signed valid intent.
    fn fixture() -> Fixture {
        let bank = DeviceKeypair::generate();
        let payer = DeviceKeypair::generate();

        let mut intent =
            PaymentIntent::new("payer@upi", "shop@upi", 50_000, None, "tok-1", 3, "");
        intent.bank_auth_proof = hex::encode(bank.sign(b"tok-1"));
        intent.payer_signature = Some(hex::encode(payer.sign(&intent.signable_bytes())));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "9999", bank.verifying_key());
        let mut map = HashMap::new();
        map.insert("payer@upi".to_string(), payer.verifying_key());

        Fixture {
            vault,
            keys: MapDirectory(map),
            intent,
        }
    }

    #[test]
    fn valid_intent_accepted() {
        let f = fixture();
        let verdict = verify_incoming_payment(&f.intent, &f.vault, &f.keys);
        match verdict {
            IncomingVerdict::Valid {
                txn_id,
                payer_upi,
                amount,
                note,
            } => {
                assert_eq!(txn_id, f.intent.txn_id);
                assert_eq!(payer_upi, "payer@upi");
                assert_eq!(amount, 50_000);
                assert!(note.is_none());
            }
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn forged_bank_proof_rejected_first() {
        let mut f = fixture();
        // Sign the token id with a key that is not the bank's. Also break
        // the payer signature: the bank check must fire first anyway.
        let impostor = DeviceKeypair::generate();
        f.intent.bank_auth_proof = hex::encode(impostor.sign(b"tok-1"));
        f.intent.payer_signature = Some("00".to_string());

        assert_eq!(
            verify_incoming_payment(&f.intent, &f.vault, &f.keys),
            IncomingVerdict::Invalid(InvalidReason::BadBankProof)
        );
    }

    #[test]
    fn garbage_bank_proof_hex_rejected() {
        let mut f = fixture();
        f.intent.bank_auth_proof = "not hex!!".to_string();
        assert_eq!(
            verify_incoming_payment(&f.intent, &f.vault, &f.keys),
            IncomingVerdict::Invalid(InvalidReason::BadBankProof)
        );
    }

    #[test]
    fn unsigned_intent_rejected() {
        let mut f = fixture();
        f.intent.payer_signature = None;
        assert_eq!(
            verify_incoming_payment(&f.intent, &f.vault, &f.keys),
            IncomingVerdict::Invalid(InvalidReason::Unsigned)
        );
    }

    #[test]
    fn unknown_payer_rejected() {
        let f = fixture();
        let empty = MapDirectory(HashMap::new());
        assert_eq!(
            verify_incoming_payment(&f.intent, &f.vault, &empty),
            IncomingVerdict::Invalid(InvalidReason::UnknownPayer)
        );
    }

    #[test]
    fn tampered_amount_breaks_payer_signature() {
        let mut f = fixture();
        f.intent.amount = 1; // signed bytes no longer match
        assert_eq!(
            verify_incoming_payment(&f.intent, &f.vault, &f.keys),
            IncomingVerdict::Invalid(InvalidReason::BadPayerSignature)
        );
    }

    #[test]
    fn stale_intent_rejected() {
        let bank = DeviceKeypair::generate();
        let payer = DeviceKeypair::generate();

        let mut intent =
            PaymentIntent::new("payer@upi", "shop@upi", 50_000, None, "tok-1", 3, "");
        intent.timestamp = Utc::now().timestamp_millis() as u64 - INCOMING_FRESHNESS_WINDOW_MS - 1;
        intent.bank_auth_proof = hex::encode(bank.sign(b"tok-1"));
        intent.payer_signature = Some(hex::encode(payer.sign(&intent.signable_bytes())));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "9999", bank.verifying_key());
        let mut map = HashMap::new();
        map.insert("payer@upi".to_string(), payer.verifying_key());

        assert_eq!(
            verify_incoming_payment(&intent, &vault, &MapDirectory(map)),
            IncomingVerdict::Invalid(InvalidReason::Stale)
        );
    }

    #[test]
    fn future_dated_intent_is_not_stale() {
        let bank = DeviceKeypair::generate();
        let payer = DeviceKeypair::generate();

        let mut intent =
            PaymentIntent::new("payer@upi", "shop@upi", 50_000, None, "tok-1", 3, "");
        intent.timestamp = Utc::now().timestamp_millis() as u64 + 60_000;
        intent.bank_auth_proof = hex::encode(bank.sign(b"tok-1"));
        intent.payer_signature = Some(hex::encode(payer.sign(&intent.signable_bytes())));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "9999", bank.verifying_key());
        let mut map = HashMap::new();
        map.insert("payer@upi".to_string(), payer.verifying_key());

        assert!(verify_incoming_payment(&intent, &vault, &MapDirectory(map)).is_valid());
    }

    #[test]
    fn zero_amount_rejected_last() {
        let bank = DeviceKeypair::generate();
        let payer = DeviceKeypair::generate();

        let mut intent = PaymentIntent::new("payer@upi", "shop@upi", 0, None, "tok-1", 3, "");
        intent.bank_auth_proof = hex::encode(bank.sign(b"tok-1"));
        intent.payer_signature = Some(hex::encode(payer.sign(&intent.signable_bytes())));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "9999", bank.verifying_key());
        let mut map = HashMap::new();
        map.insert("payer@upi".to_string(), payer.verifying_key());

        assert_eq!(
            verify_incoming_payment(&intent, &vault, &MapDirectory(map)),
            IncomingVerdict::Invalid(InvalidReason::NonPositiveAmount)
        );
    }
}
