//! Persistent storage abstraction over sled.

pub mod db;

pub use db::{DbError, DbResult, OpalDb};
