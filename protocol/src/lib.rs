// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # OPAL Protocol — Core Library
//!
//! OPAL (Offline Payment Authorization Ledger) lets a payer authorize and
//! execute a money transfer with zero network connectivity, against a
//! time-boxed spending ceiling their bank issued while they were last
//! online, and reconciles everything once connectivity returns.
//!
//! The hard part is not moving bytes over a tap — it's doing so without an
//! arbiter while still guaranteeing no double-spend, no replay, and no
//! silent balance drift. Every design decision in this crate serves those
//! three guarantees.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of an
//! offline payment stack:
//!
//! - **token** — The bank-issued authorization token and the store that
//!   owns the single active one.
//! - **payment** — Intent construction, the signing state machine, and
//!   independent verification of incoming payments.
//! - **settlement** — The durable retry queue and the worker that drains
//!   it when connectivity comes back.
//! - **ledger** — Append-only record of every balance-affecting event.
//! - **wire** — Deterministic TLV codec and the tap-exchange envelope.
//! - **signing** — The secure-hardware signing contract plus a software
//!   reference implementation.
//! - **storage** — Persistent storage abstraction over sled.
//! - **config** — Protocol constants and tuning parameters.
//!
//! ## Design Philosophy
//!
//! 1. Offline is the default, not the degraded mode.
//! 2. Money math is integer math. No floats, ever.
//! 3. Every failure is a typed result. Exceptions don't cross the engine
//!    boundary because there are no exceptions.
//! 4. If it touches the token or the queue, it goes through one write
//!    transaction. Partial state is how wallets lose money.

pub mod config;
pub mod ledger;
pub mod payment;
pub mod settlement;
pub mod signing;
pub mod storage;
pub mod token;
pub mod wire;
