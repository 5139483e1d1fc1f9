//! Bank-side token issuance.
//!
//! In production the bank issues tokens on its own infrastructure; this
//! helper exists so the sandbox node and the test suite can mint tokens
//! that pass the same verification path a real one would.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::signing::DeviceKeypair;
use crate::token::types::{AuthorizationToken, TokenStatus};

/// Mints a bank-signed authorization token.
///
/// The bank's countersignature is over the token id bytes — the same
/// thing [`crate::signing::SigningCapability::verify_bank_signature`]
/// checks on the receiving side.
pub fn issue_token(
    bank: &DeviceKeypair,
    user_id: &str,
    upi_id: &str,
    account_id: &str,
    max_amount: u64,
    validity: Duration,
) -> AuthorizationToken {
    let id = format!("tok-{}", Uuid::new_v4());
    let signature = bank.sign(id.as_bytes());
    let issued_at = Utc::now();

    AuthorizationToken {
        id,
        user_id: user_id.to_string(),
        upi_id: upi_id.to_string(),
        account_id: account_id.to_string(),
        max_amount,
        spent_amount: 0,
        issued_at,
        valid_until: issued_at + validity,
        bank_public_key: bank.public_key_hex(),
        bank_signature: hex::encode(signature),
        status: TokenStatus::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{DeviceVault, SigningCapability};

    #[test]
    fn issued_token_is_active_and_unspent() {
        let bank = DeviceKeypair::generate();
        let token = issue_token(&bank, "user-1", "payer@upi", "XXXX1234", 150_000, Duration::hours(48));

        assert!(token.id.starts_with("tok-"));
        assert_eq!(token.spent_amount, 0);
        assert_eq!(token.remaining(), 150_000);
        assert!(token.is_usable());
    }

    #[test]
    fn issued_signature_passes_vault_verification() {
        let bank = DeviceKeypair::generate();
        let token = issue_token(&bank, "user-1", "payer@upi", "XXXX1234", 150_000, Duration::hours(48));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "0000", bank.verifying_key());
        let proof = hex::decode(&token.bank_signature).unwrap();
        assert!(vault.verify_bank_signature(&token.id, &proof));
    }

    #[test]
    fn impostor_signature_fails_vault_verification() {
        let bank = DeviceKeypair::generate();
        let impostor = DeviceKeypair::generate();
        let token = issue_token(&impostor, "user-1", "payer@upi", "XXXX1234", 150_000, Duration::hours(48));

        let vault = DeviceVault::new(DeviceKeypair::generate(), "0000", bank.verifying_key());
        let proof = hex::decode(&token.bank_signature).unwrap();
        assert!(!vault.verify_bank_signature(&token.id, &proof));
    }
}
