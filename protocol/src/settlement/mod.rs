//! Settlement: the durable retry queue, the backend API contract, and
//! the worker that drains pending intents when connectivity returns.

pub mod api;
pub mod queue;
pub mod worker;

pub use api::{SettlementAck, SettlementApi, SubmitFailure};
pub use queue::{backoff_ms, SettlementQueueEntry};
pub use worker::{ConnectivityEvent, DrainReport, SettlementNotice, SettlementWorker};
