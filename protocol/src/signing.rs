//! # Signing Capability
//!
//! The contract with the device's secure signing element, plus a software
//! reference implementation for tests and the sandbox node.
//!
//! On a production handset the private key lives inside secure hardware
//! (StrongBox, Secure Enclave, a SIM applet — whatever the platform
//! offers) and never crosses into application memory. This module only
//! specifies the *capability*: verify a PIN, sign bytes, verify
//! signatures. Callers may assume a call can block briefly while the
//! hardware wakes up, but must never assume access to raw key material.
//!
//! ## Why Ed25519 for the reference implementation?
//!
//! - Deterministic signatures (no k-value footguns like ECDSA).
//! - 128-bit security in 32+32 bytes. Compact enough for a tap payload.
//! - Fast verification — the receiving device checks signatures on a
//!   phone CPU, possibly on battery saver.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the signing capability.
///
/// Intentionally vague about *why* something failed — leaking details
/// about key material or PIN state through error messages is a classic
/// footgun.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing operation failed")]
    SigningFailed,

    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

// ---------------------------------------------------------------------------
// SigningCapability
// ---------------------------------------------------------------------------

/// The capability contract every signing backend must satisfy.
///
/// The payment engine talks exclusively to this trait. Nothing in the
/// contract returns or accepts raw private-key bytes, and no conforming
/// implementation may do so through a side door.
pub trait SigningCapability: Send + Sync {
    /// Checks the user's PIN against the enrolled credential.
    fn verify_pin(&self, pin: &str) -> bool;

    /// Signs arbitrary bytes with the device key. May block briefly while
    /// the secure element wakes up.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// Verifies a signature produced by this device's key.
    fn verify_payer_signature(&self, data: &[u8], signature: &[u8]) -> bool;

    /// Verifies the bank's countersignature over a token id using the
    /// bank public key provisioned at enrollment.
    fn verify_bank_signature(&self, token_id: &str, signature: &[u8]) -> bool;

    /// The device's public key, hex-encoded. Safe to share; this is what
    /// payees use to verify signatures on received intents.
    fn public_key_hex(&self) -> String;
}

// ---------------------------------------------------------------------------
// DeviceKeypair
// ---------------------------------------------------------------------------

/// An Ed25519 keypair wrapping signing and verification for one device.
///
/// Deliberately does NOT implement `Serialize`/`Deserialize` — exporting
/// private keys should be a conscious act, not something that happens
/// because someone shoved a keypair into a JSON response. Use
/// `secret_key_bytes()` / `from_seed()` explicitly.
pub struct DeviceKeypair {
    signing_key: SigningKey,
}

impl DeviceKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Constructs a keypair deterministically from a 32-byte seed.
    ///
    /// **Warning**: a weak seed gives you a weak key. Use a proper CSPRNG
    /// or KDF to produce the seed bytes.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key. Devnet
    /// convenience; don't put raw hex keys in config files in production.
    pub fn from_hex(hex_str: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(hex_str).map_err(|_| SigningError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(SigningError::InvalidSecretKey);
        }
        let mut arr = [0u8; SECRET_KEY_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_seed(&arr))
    }

    /// Sign a message. Ed25519 signatures are deterministic — the same
    /// (key, message) pair always produces the same 64 bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with_key(&self.signing_key.verifying_key(), message, signature)
    }

    /// The public half, for direct use with ed25519-dalek.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Raw public key bytes (32 bytes). Safe to share, log, tattoo on
    /// your arm, etc.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex-encoded public key. 64 characters.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Exports the raw 32-byte secret key material. **Handle with extreme
    /// care** — this is the only secret standing between an attacker and
    /// the ability to spend this device's ceiling.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for DeviceKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material in debug output. Not even
        // "partially" — a partial leak is still a leak.
        write!(f, "DeviceKeypair(pub={})", self.public_key_hex())
    }
}

impl Clone for DeviceKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

/// Verify a signature given a verifying key and raw signature bytes.
///
/// Returns `false` (never panics, never errors) for malformed input —
/// the vast majority of callers want a yes/no answer, and a detailed
/// failure oracle helps nobody but attackers.
pub fn verify_with_key(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let sig_arr: [u8; 64] = match signature.try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };
    let sig = DalekSignature::from_bytes(&sig_arr);
    key.verify(message, &sig).is_ok()
}

/// Parse a hex-encoded Ed25519 verifying key.
///
/// Validates both the hex and that the bytes are an actual curve point —
/// low-order points and other degenerate cases are rejected here rather
/// than surfacing as confusing verification failures later.
pub fn verifying_key_from_hex(hex_str: &str) -> Result<VerifyingKey, SigningError> {
    let bytes = hex::decode(hex_str).map_err(|_| SigningError::InvalidPublicKey)?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| SigningError::InvalidPublicKey)
}

// ---------------------------------------------------------------------------
// DeviceVault — software reference implementation
// ---------------------------------------------------------------------------

/// Software signing backend: an in-memory keypair, a SHA-256 PIN digest,
/// and the bank's verifying key provisioned at enrollment.
///
/// This is what the sandbox node and the test suite use. It honors the
/// capability contract — the secret key never leaves the struct — but it
/// offers none of the hardware guarantees, so it must never ship on a
/// real device as the only line of defense.
pub struct DeviceVault {
    keypair: DeviceKeypair,
    pin_digest: [u8; 32],
    bank_key: VerifyingKey,
}

impl DeviceVault {
    /// Enrolls a new vault with the given PIN and bank verifying key.
    pub fn new(keypair: DeviceKeypair, pin: &str, bank_key: VerifyingKey) -> Self {
        Self {
            keypair,
            pin_digest: pin_digest(pin),
            bank_key,
        }
    }

    /// The bank key this vault was provisioned with.
    pub fn bank_key(&self) -> &VerifyingKey {
        &self.bank_key
    }
}

impl SigningCapability for DeviceVault {
    fn verify_pin(&self, pin: &str) -> bool {
        // Digest comparison, not string comparison: the enrolled PIN is
        // never stored in the clear.
        pin_digest(pin) == self.pin_digest
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(self.keypair.sign(data))
    }

    fn verify_payer_signature(&self, data: &[u8], signature: &[u8]) -> bool {
        self.keypair.verify(data, signature)
    }

    fn verify_bank_signature(&self, token_id: &str, signature: &[u8]) -> bool {
        verify_with_key(&self.bank_key, token_id.as_bytes(), signature)
    }

    fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }
}

fn pin_digest(pin: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> DeviceVault {
        let bank = DeviceKeypair::generate();
        DeviceVault::new(DeviceKeypair::generate(), "4321", bank.verifying_key())
    }

    #[test]
    fn sign_verify_roundtrip() {
        let kp = DeviceKeypair::generate();
        let msg = b"pay shop@upi 50000";
        let sig = kp.sign(msg);
        assert!(kp.verify(msg, &sig));
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = DeviceKeypair::generate();
        let sig = kp.sign(b"correct message");
        assert!(!kp.verify(b"wrong message", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = DeviceKeypair::generate();
        let kp2 = DeviceKeypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.verify(b"message", &sig));
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [42u8; 32];
        let kp1 = DeviceKeypair::from_seed(&seed);
        let kp2 = DeviceKeypair::from_seed(&seed);
        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
    }

    #[test]
    fn hex_roundtrip() {
        let kp = DeviceKeypair::generate();
        let restored = DeviceKeypair::from_hex(&hex::encode(kp.secret_key_bytes())).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(DeviceKeypair::from_hex("deadbeef").is_err());
        assert!(DeviceKeypair::from_hex("not-hex-at-all").is_err());
    }

    #[test]
    fn malformed_signature_is_false_not_panic() {
        let kp = DeviceKeypair::generate();
        assert!(!kp.verify(b"msg", b"too short"));
        assert!(!kp.verify(b"msg", &[0u8; 63]));
        assert!(!kp.verify(b"msg", &[0u8; 65]));
    }

    #[test]
    fn verifying_key_from_hex_rejects_garbage() {
        assert!(verifying_key_from_hex("zz").is_err());
        assert!(verifying_key_from_hex(&hex::encode([0u8; 16])).is_err());
    }

    #[test]
    fn vault_pin_check() {
        let v = vault();
        assert!(v.verify_pin("4321"));
        assert!(!v.verify_pin("1234"));
        assert!(!v.verify_pin(""));
    }

    #[test]
    fn vault_signs_and_verifies_own_signature() {
        let v = vault();
        let sig = v.sign(b"intent bytes").unwrap();
        assert!(v.verify_payer_signature(b"intent bytes", &sig));
        assert!(!v.verify_payer_signature(b"other bytes", &sig));
    }

    #[test]
    fn vault_checks_bank_signature_against_provisioned_key() {
        let bank = DeviceKeypair::generate();
        let v = DeviceVault::new(DeviceKeypair::generate(), "0000", bank.verifying_key());

        let token_id = "tok-abc";
        let good = bank.sign(token_id.as_bytes());
        assert!(v.verify_bank_signature(token_id, &good));

        let impostor = DeviceKeypair::generate();
        let bad = impostor.sign(token_id.as_bytes());
        assert!(!v.verify_bank_signature(token_id, &bad));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = DeviceKeypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("DeviceKeypair(pub="));
        assert!(!debug_str.contains("signing_key"));
    }
}
