//! # Protocol Configuration & Constants
//!
//! Every magic number in OPAL lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Several of these values are part of the wire format or the settlement
//! contract with the backend. Changing them after devices are in the field
//! breaks tap compatibility, so choose wisely during the pilot.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

/// 4-byte ASCII magic that prefixes every TLV payment payload. A terminal
/// that reads anything else can reject the buffer without parsing further.
pub const WIRE_MAGIC: &[u8; 4] = b"OPAY";

/// Registered application identifier for the tap exchange. The proprietary
/// `0xF0` prefix keeps us out of the ISO-registered AID space; the rest is
/// "OPAY01" in ASCII.
pub const APPLICATION_ID: &[u8] = &[0xF0, 0x4F, 0x50, 0x41, 0x59, 0x30, 0x31];

/// Status word appended to every envelope response: success.
pub const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

/// Status word appended to every envelope response: failure. Deliberately
/// a single generic code — the terminal gets no oracle about *why*.
pub const SW_FAILURE: [u8; 2] = [0x6F, 0x00];

/// TLV tag assignments. These are the wire format; never renumber.
pub const TAG_TXN_ID: u8 = 0x01;
pub const TAG_PAYER_UPI: u8 = 0x02;
pub const TAG_PAYEE_UPI: u8 = 0x03;
pub const TAG_AMOUNT: u8 = 0x04;
pub const TAG_NOTE: u8 = 0x05;
pub const TAG_TIMESTAMP: u8 = 0x06;
pub const TAG_AUTH_TOKEN_ID: u8 = 0x07;
pub const TAG_SEQUENCE: u8 = 0x08;
pub const TAG_PAYER_SIGNATURE: u8 = 0x09;
pub const TAG_BANK_AUTH_PROOF: u8 = 0x0A;

/// Payload ceiling for a single tap exchange. Constrained channels (NFC
/// field, BLE characteristic) top out at a few kilobytes per exchange.
pub const MAX_WIRE_PAYLOAD_BYTES: usize = 4 * 1024;

// ---------------------------------------------------------------------------
// Settlement Retry Schedule
// ---------------------------------------------------------------------------

/// Base backoff delay. First retry after a failure waits 2x this (the
/// attempt counter is incremented before the backoff is computed).
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Backoff ceiling: one hour. Beyond this, longer waits don't help —
/// either the backend comes back or the attempt ceiling kicks in first.
pub const BACKOFF_CAP_MS: u64 = 3_600_000;

/// After this many failed submission attempts the owning intent is marked
/// permanently Failed and the user is notified out-of-band. Ten attempts
/// with exponential backoff spans roughly two hours of trying.
pub const MAX_SETTLEMENT_ATTEMPTS: u32 = 10;

/// Per-entry remote submission timeout. A stuck entry must not starve the
/// rest of the queue; the worker moves on and the entry retries later.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Verification Windows
// ---------------------------------------------------------------------------

/// Freshness window for incoming payments. An intent older than this is
/// rejected by the receiver — it may have been replayed from a stale tap.
pub const INCOMING_FRESHNESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Same window as milliseconds, for arithmetic against intent timestamps.
pub const INCOMING_FRESHNESS_WINDOW_MS: u64 = 24 * 60 * 60 * 1_000;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum length of the free-text note carried with a payment. Enough
/// for "groceries", not enough for your novel.
pub const MAX_NOTE_LENGTH: usize = 256;

/// Maximum length of a UPI-style routable identity ("payer@bank").
pub const MAX_UPI_ID_LENGTH: usize = 128;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 signature length. Always 64 bytes. If yours isn't, something
/// has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Canonical field delimiter in the signable encoding of an intent.
/// Part of the signature contract with the bank; never change it.
pub const SIGNABLE_DELIMITER: char = '|';

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_magic_is_ascii() {
        assert!(WIRE_MAGIC.iter().all(|b| b.is_ascii_alphanumeric()));
        assert_eq!(WIRE_MAGIC.len(), 4);
    }

    #[test]
    fn application_id_has_proprietary_prefix() {
        assert_eq!(APPLICATION_ID[0], 0xF0);
        assert!(APPLICATION_ID.len() >= 5 && APPLICATION_ID.len() <= 16);
    }

    #[test]
    fn tlv_tags_are_unique() {
        let tags = [
            TAG_TXN_ID,
            TAG_PAYER_UPI,
            TAG_PAYEE_UPI,
            TAG_AMOUNT,
            TAG_NOTE,
            TAG_TIMESTAMP,
            TAG_AUTH_TOKEN_ID,
            TAG_SEQUENCE,
            TAG_PAYER_SIGNATURE,
            TAG_BANK_AUTH_PROOF,
        ];
        let mut deduped = tags.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(tags.len(), deduped.len(), "TLV tags must be unique");
    }

    #[test]
    fn status_words_are_distinct() {
        assert_ne!(SW_SUCCESS, SW_FAILURE);
    }

    #[test]
    fn backoff_parameters_sanity() {
        assert!(BACKOFF_BASE_MS < BACKOFF_CAP_MS);
        assert!(MAX_SETTLEMENT_ATTEMPTS > 0);
    }

    #[test]
    fn freshness_window_matches_ms_constant() {
        assert_eq!(
            INCOMING_FRESHNESS_WINDOW.as_millis() as u64,
            INCOMING_FRESHNESS_WINDOW_MS
        );
    }
}
