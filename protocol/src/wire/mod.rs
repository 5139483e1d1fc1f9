//! The tap wire format: TLV payload codec and the command/response
//! envelope spoken over the physical transport.

pub mod envelope;
pub mod tlv;

pub use envelope::TapEndpoint;
pub use tlv::{decode_intent, encode_intent};
