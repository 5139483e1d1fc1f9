//! Offline payments: intent construction, the signing state machine, and
//! independent verification of incoming intents.

pub mod engine;
pub mod intent;
pub mod verify;

pub use engine::{PayError, PaymentEngine, PaymentSuccess};
pub use intent::{IntentStatus, PaymentIntent};
pub use verify::{verify_incoming_payment, IncomingVerdict, InvalidReason, PayerKeyDirectory};
