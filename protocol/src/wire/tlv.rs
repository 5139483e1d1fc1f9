//! TLV codec for payment intents crossing the tap boundary.
//!
//! Layout: the 4-byte ASCII magic, then a flat sequence of records —
//! 1-byte tag, 2-byte big-endian length, value. String values are UTF-8;
//! `amount`, `timestamp`, and `sequence_number` are 8-byte big-endian
//! integers. Tag numbers live in [`crate::config`] and are frozen.
//!
//! The decoder is fail-closed and total: wrong magic, a truncated
//! record, a length pointing past the buffer, a malformed integer width,
//! invalid UTF-8, or a missing required tag all yield `None`. The input
//! arrives from an untrusted radio; nothing in here panics on it.
//!
//! Bookkeeping fields (`status`, `created_offline`, `settled_at`) are
//! not on the wire. A decoded intent materializes as `Delivered` — by
//! definition it has just crossed the transport.

use crate::config::{
    TAG_AMOUNT, TAG_AUTH_TOKEN_ID, TAG_BANK_AUTH_PROOF, TAG_NOTE, TAG_PAYEE_UPI,
    TAG_PAYER_SIGNATURE, TAG_PAYER_UPI, TAG_SEQUENCE, TAG_TIMESTAMP, TAG_TXN_ID, WIRE_MAGIC,
};
use crate::payment::intent::{IntentStatus, PaymentIntent};

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes an intent as a magic-prefixed TLV byte string.
///
/// Every tag is always emitted, in ascending tag order; an absent note
/// or signature becomes a zero-length record. That keeps the encoding
/// deterministic — one intent, one byte string — which the round-trip
/// contract depends on.
pub fn encode_intent(intent: &PaymentIntent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(WIRE_MAGIC);

    push_record(&mut buf, TAG_TXN_ID, intent.txn_id.as_bytes());
    push_record(&mut buf, TAG_PAYER_UPI, intent.payer_upi.as_bytes());
    push_record(&mut buf, TAG_PAYEE_UPI, intent.payee_upi.as_bytes());
    push_record(&mut buf, TAG_AMOUNT, &intent.amount.to_be_bytes());
    push_record(
        &mut buf,
        TAG_NOTE,
        intent.note.as_deref().unwrap_or("").as_bytes(),
    );
    push_record(&mut buf, TAG_TIMESTAMP, &intent.timestamp.to_be_bytes());
    push_record(&mut buf, TAG_AUTH_TOKEN_ID, intent.auth_token_id.as_bytes());
    push_record(&mut buf, TAG_SEQUENCE, &intent.sequence_number.to_be_bytes());
    push_record(
        &mut buf,
        TAG_PAYER_SIGNATURE,
        intent.payer_signature.as_deref().unwrap_or("").as_bytes(),
    );
    push_record(&mut buf, TAG_BANK_AUTH_PROOF, intent.bank_auth_proof.as_bytes());

    buf
}

fn push_record(buf: &mut Vec<u8>, tag: u8, value: &[u8]) {
    // Value lengths are bounded well below u16::MAX by the field limits
    // in config; the cast cannot truncate for any intent this crate
    // constructs.
    buf.push(tag);
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes a magic-prefixed TLV byte string back into an intent.
///
/// Returns `None` on any malformation. All tags except the note are
/// required; unknown tags are skipped so that a newer peer can append
/// fields without breaking older devices.
pub fn decode_intent(bytes: &[u8]) -> Option<PaymentIntent> {
    let body = bytes.strip_prefix(WIRE_MAGIC.as_slice())?;

    let mut txn_id = None;
    let mut payer_upi = None;
    let mut payee_upi = None;
    let mut amount = None;
    let mut note = None;
    let mut timestamp = None;
    let mut auth_token_id = None;
    let mut sequence_number = None;
    let mut payer_signature = None;
    let mut bank_auth_proof = None;
    // The signature record is required but its value may be empty, so
    // its Option above cannot double as a presence check the way the
    // other required tags' can.
    let mut saw_signature = false;

    let mut rest = body;
    while !rest.is_empty() {
        // Header: tag byte + 2-byte length.
        if rest.len() < 3 {
            return None;
        }
        let tag = rest[0];
        let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
        rest = &rest[3..];
        if rest.len() < len {
            return None;
        }
        let (value, tail) = rest.split_at(len);
        rest = tail;

        match tag {
            TAG_TXN_ID => txn_id = Some(utf8(value)?),
            TAG_PAYER_UPI => payer_upi = Some(utf8(value)?),
            TAG_PAYEE_UPI => payee_upi = Some(utf8(value)?),
            TAG_AMOUNT => amount = Some(be_u64(value)?),
            TAG_NOTE => {
                let s = utf8(value)?;
                note = if s.is_empty() { None } else { Some(s) };
            }
            TAG_TIMESTAMP => timestamp = Some(be_u64(value)?),
            TAG_AUTH_TOKEN_ID => auth_token_id = Some(utf8(value)?),
            TAG_SEQUENCE => sequence_number = Some(be_u64(value)?),
            TAG_PAYER_SIGNATURE => {
                saw_signature = true;
                let s = utf8(value)?;
                payer_signature = if s.is_empty() { None } else { Some(s) };
            }
            TAG_BANK_AUTH_PROOF => bank_auth_proof = Some(utf8(value)?),
            _ => {} // unknown tag: skip
        }
    }

    // Every tag except the note is required. The note shares the
    // always-emitted zero-length convention but its record may lawfully
    // be absent; a missing signature record fails closed like the rest.
    if !saw_signature {
        return None;
    }

    Some(PaymentIntent {
        txn_id: txn_id?,
        payer_upi: payer_upi?,
        payee_upi: payee_upi?,
        amount: amount?,
        note,
        timestamp: timestamp?,
        auth_token_id: auth_token_id?,
        sequence_number: sequence_number?,
        payer_signature,
        bank_auth_proof: bank_auth_proof?,
        status: IntentStatus::Delivered,
        created_offline: true,
        settled_at: None,
    })
}

fn utf8(value: &[u8]) -> Option<String> {
    String::from_utf8(value.to_vec()).ok()
}

fn be_u64(value: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
