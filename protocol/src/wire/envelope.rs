//! Command/response envelope for the tap exchange.
//!
//! The terminal drives the conversation: it selects the application by
//! identifier, then asks for the pending payment. Both commands follow
//! the classic smartcard shape — class byte, instruction byte, two
//! parameter bytes, optional length-prefixed data — and every response
//! ends in a 2-byte status word.
//!
//! Failure responses are deliberately uninformative: a bare failure
//! status word, no reason codes. The terminal is untrusted and gets no
//! oracle about the device's internal state.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{APPLICATION_ID, MAX_WIRE_PAYLOAD_BYTES, SW_FAILURE, SW_SUCCESS};
use crate::payment::intent::{IntentStatus, PaymentIntent};
use crate::wire::tlv::encode_intent;

/// Instruction byte: select application by identifier.
const INS_SELECT: u8 = 0xA4;

/// Instruction byte: fetch the pending payment payload.
const INS_GET_PAYMENT: u8 = 0xCA;

/// Fixed acknowledgement body returned to a successful select.
const SELECT_ACK: &[u8] = b"OPAY01";

/// The device side of the tap exchange.
///
/// Holds at most one outbound intent. The payload is single-use: a
/// successful `GET PAYMENT` clears it, and a repeated request before the
/// next [`TapEndpoint::queue_intent`] fails. Without that rule a
/// malicious terminal could read the same payment twice and present
/// both copies.
pub struct TapEndpoint {
    pending: Mutex<Option<PaymentIntent>>,
}

impl Default for TapEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl TapEndpoint {
    /// Creates an endpoint with no pending payment.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Stages `intent` as the next (sole) outbound payment. Returns the
    /// intent it displaced, if one was still waiting.
    pub fn queue_intent(&self, intent: PaymentIntent) -> Option<PaymentIntent> {
        let displaced = self.pending.lock().replace(intent);
        if let Some(old) = &displaced {
            warn!(txn_id = %old.txn_id, "undelivered intent displaced from tap endpoint");
        }
        displaced
    }

    /// Whether a payment is staged for the next tap.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Handles one raw command from the terminal and produces the full
    /// response, status word included. Total over arbitrary input.
    pub fn process_command(&self, command: &[u8]) -> Vec<u8> {
        match parse_command(command) {
            Some((INS_SELECT, data)) if data == APPLICATION_ID => {
                debug!("application selected");
                respond(SELECT_ACK, SW_SUCCESS)
            }
            Some((INS_GET_PAYMENT, _)) => self.deliver_pending(),
            _ => respond(&[], SW_FAILURE),
        }
    }

    /// Serializes and clears the pending intent.
    fn deliver_pending(&self) -> Vec<u8> {
        let mut pending = self.pending.lock();

        let Some(intent) = pending.as_ref() else {
            return respond(&[], SW_FAILURE);
        };

        let mut outbound = intent.clone();
        outbound.status = IntentStatus::Delivered;
        let payload = encode_intent(&outbound);
        if payload.len() > MAX_WIRE_PAYLOAD_BYTES {
            // Cannot cross the channel; keep it staged so the caller can
            // notice and recover instead of silently losing the intent.
            warn!(
                txn_id = %outbound.txn_id,
                bytes = payload.len(),
                "pending intent exceeds wire payload ceiling"
            );
            return respond(&[], SW_FAILURE);
        }

        debug!(txn_id = %outbound.txn_id, bytes = payload.len(), "payment delivered over tap");
        *pending = None;
        respond(&payload, SW_SUCCESS)
    }
}

/// Extracts (instruction, data) from a raw command. Only class `0x00`
/// is spoken; anything short, foreign, or with a lying length field is
/// rejected as a whole.
fn parse_command(command: &[u8]) -> Option<(u8, &[u8])> {
    if command.len() < 4 || command[0] != 0x00 {
        return None;
    }
    let ins = command[1];
    let data = match command.get(4) {
        None => &[][..],
        Some(&lc) => {
            let lc = lc as usize;
            if command.len() < 5 + lc {
                return None;
            }
            &command[5..5 + lc]
        }
    };
    Some((ins, data))
}

fn respond(body: &[u8], status: [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(body);
    out.extend_from_slice(&status);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
