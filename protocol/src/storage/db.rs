//! # OpalDb — Persistent Storage Engine
//!
//! The durability layer for the offline wallet, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees" (analogous to column families
//! in RocksDB). Each tree is an independent B+ tree with its own keyspace:
//!
//! | Tree       | Key                  | Value                           |
//! |------------|----------------------|---------------------------------|
//! | `tokens`   | token id (UTF-8)     | `bincode(AuthorizationToken)`   |
//! | `intents`  | txn id (UTF-8)       | `bincode(PaymentIntent)`        |
//! | `queue`    | txn id (UTF-8)       | `bincode(SettlementQueueEntry)` |
//! | `ledger`   | seq (8B BE)          | `bincode(LedgerEntry)`          |
//! | `metadata` | key (UTF-8)          | value (bytes)                   |
//!
//! Ledger keys are big-endian u64 sequence numbers so that sled's
//! lexicographic ordering matches append order — iteration replays the
//! audit trail naturally.
//!
//! ## Atomicity
//!
//! Committing a payment touches five trees: the deducted token, the
//! signed intent, the queue entry, the ledger debit, and the sequence
//! metadata. All of it goes through a single multi-tree
//! [`sled::Transactional`] transaction — either everything lands on disk
//! or nothing does. A crash between "deducted" and "enqueued" would be a
//! silent loss of money; this layout makes that state unrepresentable.
//!
//! ## Sequence Allocation
//!
//! The per-device anti-replay counter lives in `metadata` under
//! `payment_sequence` and is bumped with `update_and_fetch` followed by a
//! flush. Strictly monotonic across restarts; two allocations can never
//! return the same value.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::ledger::LedgerEntry;
use crate::payment::intent::{IntentStatus, PaymentIntent};
use crate::settlement::queue::SettlementQueueEntry;
use crate::token::types::AuthorizationToken;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<TransactionError<String>> for DbError {
    fn from(err: TransactionError<String>) -> Self {
        match err {
            TransactionError::Abort(msg) => DbError::Serialization(msg),
            TransactionError::Storage(e) => DbError::Sled(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Pointer to the sole active token's id.
const META_ACTIVE_TOKEN: &[u8] = b"active_token_id";

/// The global per-device payment sequence counter (anti-replay).
const META_PAYMENT_SEQUENCE: &[u8] = b"payment_sequence";

/// Append position for the ledger tree.
const META_LEDGER_SEQUENCE: &[u8] = b"ledger_sequence";

// ---------------------------------------------------------------------------
// OpalDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for the offline wallet.
///
/// Wraps a sled `Db` and exposes typed accessors for tokens, intents,
/// queue entries, and ledger records. All serialization uses bincode for
/// compactness and speed.
///
/// # Thread Safety
///
/// sled is inherently thread-safe — all trees support lock-free
/// concurrent reads and serialized writes. `OpalDb` can be shared across
/// threads via `Arc<OpalDb>` without external synchronization; the
/// higher-level single-writer discipline on the token is enforced by
/// [`crate::token::TokenStore`], not here.
#[derive(Debug, Clone)]
pub struct OpalDb {
    db: Db,
    tokens: Tree,
    intents: Tree,
    queue: Tree,
    ledger: Tree,
    metadata: Tree,
}

impl OpalDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is cleaned up on drop.
    ///
    /// Ideal for unit tests — no filesystem side effects, no cleanup.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let tokens = db.open_tree("tokens")?;
        let intents = db.open_tree("intents")?;
        let queue = db.open_tree("queue")?;
        let ledger = db.open_tree("ledger")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            tokens,
            intents,
            queue,
            ledger,
            metadata,
        })
    }

    // -- Sequence allocation ------------------------------------------------

    /// Allocate the next payment sequence number. Strictly monotonic and
    /// crash-consistent: the bump is atomic and flushed before the value
    /// is handed out, so a crash can skip values but never repeat one.
    pub fn next_sequence(&self) -> DbResult<u64> {
        let bumped = self.metadata.update_and_fetch(META_PAYMENT_SEQUENCE, |old| {
            let current = old.map(decode_u64).unwrap_or(0);
            Some(current.wrapping_add(1).to_be_bytes().to_vec())
        })?;
        self.db.flush()?;
        // update_and_fetch with a Some-returning closure always yields a value.
        let bytes = bumped.ok_or_else(|| DbError::NotFound("payment_sequence".into()))?;
        Ok(decode_u64(&bytes))
    }

    /// The most recently allocated sequence number, 0 if none yet.
    pub fn current_sequence(&self) -> DbResult<u64> {
        Ok(self
            .metadata
            .get(META_PAYMENT_SEQUENCE)?
            .map(|v| decode_u64(&v))
            .unwrap_or(0))
    }

    // -- Token operations ---------------------------------------------------

    /// Fetch a token by id.
    pub fn get_token(&self, token_id: &str) -> DbResult<Option<AuthorizationToken>> {
        match self.tokens.get(token_id.as_bytes())? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored tokens, in key order.
    pub fn all_tokens(&self) -> DbResult<Vec<AuthorizationToken>> {
        let mut out = Vec::new();
        for item in self.tokens.iter() {
            let (_, bytes) = item?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    /// The id the active-token pointer currently names, if any.
    pub fn active_token_id(&self) -> DbResult<Option<String>> {
        Ok(self
            .metadata
            .get(META_ACTIVE_TOKEN)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Store `token` as the sole Active one, demoting every other token
    /// to Expired, in a single atomic transaction. There is no window in
    /// which zero or two tokens are active on disk.
    pub fn store_token_exclusive(&self, token: &AuthorizationToken) -> DbResult<()> {
        // Ids are collected outside the transaction (transactional trees
        // cannot iterate); the caller serializes writers, so the set
        // cannot change underneath us.
        let existing = self.all_tokens()?;

        (&self.tokens, &self.metadata)
            .transaction(|(tokens, metadata)| {
                for old in &existing {
                    if old.id == token.id {
                        continue;
                    }
                    let mut demoted = old.clone();
                    demoted.status = crate::token::types::TokenStatus::Expired;
                    tokens.insert(demoted.id.as_bytes(), ser_tx(&demoted)?)?;
                }
                tokens.insert(token.id.as_bytes(), ser_tx(token)?)?;
                metadata.insert(META_ACTIVE_TOKEN, token.id.as_bytes())?;
                Ok(())
            })
            .map_err(DbError::from)?;

        self.db.flush()?;
        Ok(())
    }

    /// Overwrite a single token record. Used for deductions outside the
    /// payment path (the payment path goes through [`Self::commit_payment`]).
    pub fn put_token(&self, token: &AuthorizationToken) -> DbResult<()> {
        self.tokens.insert(token.id.as_bytes(), ser(token)?)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Intent operations --------------------------------------------------

    /// Fetch an intent by transaction id.
    pub fn get_intent(&self, txn_id: &str) -> DbResult<Option<PaymentIntent>> {
        match self.intents.get(txn_id.as_bytes())? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an intent record (status transitions outside the
    /// transactional paths, e.g. marking it Delivered after a tap).
    pub fn put_intent(&self, intent: &PaymentIntent) -> DbResult<()> {
        self.intents.insert(intent.txn_id.as_bytes(), ser(intent)?)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Queue operations ---------------------------------------------------

    /// Fetch a queue entry by transaction id.
    pub fn get_queue_entry(&self, txn_id: &str) -> DbResult<Option<SettlementQueueEntry>> {
        match self.queue.get(txn_id.as_bytes())? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All queue entries, in key order.
    pub fn queue_entries(&self) -> DbResult<Vec<SettlementQueueEntry>> {
        let mut out = Vec::new();
        for item in self.queue.iter() {
            let (_, bytes) = item?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    /// Entries eligible for submission at `now_ms` (backoff elapsed,
    /// ceiling not hit, intent not terminal).
    pub fn due_queue_entries(&self, now_ms: u64) -> DbResult<Vec<SettlementQueueEntry>> {
        Ok(self
            .queue_entries()?
            .into_iter()
            .filter(|e| e.is_due(now_ms))
            .collect())
    }

    /// Number of entries still awaiting settlement (terminal intents
    /// excluded). This is the count the UI shows as "pending payments".
    pub fn pending_queue_count(&self) -> DbResult<usize> {
        Ok(self
            .queue_entries()?
            .iter()
            .filter(|e| !e.intent.status.is_terminal())
            .count())
    }

    /// Overwrite one queue entry's retry bookkeeping.
    pub fn update_queue_entry(&self, entry: &SettlementQueueEntry) -> DbResult<()> {
        self.queue.insert(entry.txn_id.as_bytes(), ser(entry)?)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Ledger operations --------------------------------------------------

    /// Append one ledger entry. The key is the next ledger sequence
    /// number, so iteration order is append order.
    pub fn append_ledger(&self, entry: &LedgerEntry) -> DbResult<()> {
        (&self.ledger, &self.metadata)
            .transaction(|(ledger, metadata)| {
                let seq = next_ledger_seq(metadata)?;
                ledger.insert(&seq.to_be_bytes(), ser_tx(entry)?)?;
                Ok(())
            })
            .map_err(DbError::from)?;
        self.db.flush()?;
        Ok(())
    }

    /// The full audit trail, in append order.
    pub fn ledger_entries(&self) -> DbResult<Vec<LedgerEntry>> {
        let mut out = Vec::new();
        for item in self.ledger.iter() {
            let (_, bytes) = item?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    /// All ledger entries of one kind, in append order. The audit
    /// surface a support query actually uses ("show me every
    /// reconciliation").
    pub fn ledger_entries_of_kind(&self, kind: crate::ledger::LedgerKind) -> DbResult<Vec<LedgerEntry>> {
        Ok(self
            .ledger_entries()?
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect())
    }

    /// Number of ledger entries.
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    // -- Composite transactions --------------------------------------------

    /// Commit one signed payment as a single all-or-nothing unit:
    ///
    /// 1. The deducted token.
    /// 2. The signed intent.
    /// 3. The settlement queue entry.
    /// 4. The ledger debit.
    ///
    /// Any failure leaves all five trees exactly as they were — the
    /// invariant that makes an offline wallet trustworthy.
    pub fn commit_payment(
        &self,
        token: &AuthorizationToken,
        intent: &PaymentIntent,
        entry: &SettlementQueueEntry,
        ledger_entry: &LedgerEntry,
    ) -> DbResult<()> {
        (
            &self.tokens,
            &self.intents,
            &self.queue,
            &self.ledger,
            &self.metadata,
        )
            .transaction(|(tokens, intents, queue, ledger, metadata)| {
                tokens.insert(token.id.as_bytes(), ser_tx(token)?)?;
                intents.insert(intent.txn_id.as_bytes(), ser_tx(intent)?)?;
                queue.insert(entry.txn_id.as_bytes(), ser_tx(entry)?)?;
                let seq = next_ledger_seq(metadata)?;
                ledger.insert(&seq.to_be_bytes(), ser_tx(ledger_entry)?)?;
                Ok(())
            })
            .map_err(DbError::from)?;

        self.db.flush()?;
        Ok(())
    }

    /// Commit a confirmed settlement: intent goes terminal Settled, the
    /// queue entry is removed, and the settlement ledger record lands —
    /// atomically, so an interrupted worker can never leave a settled
    /// intent still sitting in the queue.
    pub fn commit_settlement(
        &self,
        intent: &PaymentIntent,
        ledger_entry: &LedgerEntry,
    ) -> DbResult<()> {
        debug_assert_eq!(intent.status, IntentStatus::Settled);

        (&self.intents, &self.queue, &self.ledger, &self.metadata)
            .transaction(|(intents, queue, ledger, metadata)| {
                intents.insert(intent.txn_id.as_bytes(), ser_tx(intent)?)?;
                queue.remove(intent.txn_id.as_bytes())?;
                let seq = next_ledger_seq(metadata)?;
                ledger.insert(&seq.to_be_bytes(), ser_tx(ledger_entry)?)?;
                Ok(())
            })
            .map_err(DbError::from)?;

        self.db.flush()?;
        Ok(())
    }

    /// Commit one failed-but-retryable submission: the intent's status
    /// reset and the entry's bumped attempt bookkeeping land together.
    /// Split across two writes, a crash in between would leave a
    /// not-yet-bumped counter and grant the entry one extra
    /// full-frequency retry.
    pub fn commit_reschedule(
        &self,
        intent: &PaymentIntent,
        entry: &SettlementQueueEntry,
    ) -> DbResult<()> {
        (&self.intents, &self.queue)
            .transaction(|(intents, queue)| {
                intents.insert(intent.txn_id.as_bytes(), ser_tx(intent)?)?;
                queue.insert(entry.txn_id.as_bytes(), ser_tx(entry)?)?;
                Ok(())
            })
            .map_err(DbError::from)?;

        self.db.flush()?;
        Ok(())
    }

    /// Commit a terminal settlement failure: the intent goes Failed and
    /// the exhausted entry's final bookkeeping is persisted. The entry
    /// stays in the tree for audit but will never be due again.
    pub fn commit_terminal_failure(
        &self,
        intent: &PaymentIntent,
        entry: &SettlementQueueEntry,
    ) -> DbResult<()> {
        debug_assert_eq!(intent.status, IntentStatus::Failed);

        (&self.intents, &self.queue)
            .transaction(|(intents, queue)| {
                intents.insert(intent.txn_id.as_bytes(), ser_tx(intent)?)?;
                queue.insert(entry.txn_id.as_bytes(), ser_tx(entry)?)?;
                Ok(())
            })
            .map_err(DbError::from)?;

        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

fn ser<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Serialize inside a transaction closure, aborting the transaction on
/// failure rather than committing half a write set.
fn ser_tx<T: serde::Serialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<String>> {
    bincode::serialize(value).map_err(|e| ConflictableTransactionError::Abort(e.to_string()))
}

/// Bump and return the ledger append position inside a transaction.
fn next_ledger_seq(
    metadata: &sled::transaction::TransactionalTree,
) -> Result<u64, ConflictableTransactionError<String>> {
    let current = metadata
        .get(META_LEDGER_SEQUENCE)?
        .map(|v| decode_u64(&v))
        .unwrap_or(0);
    let next = current.wrapping_add(1);
    metadata.insert(META_LEDGER_SEQUENCE, &next.to_be_bytes())?;
    Ok(next)
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    let len = bytes.len().min(8);
    arr[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(arr)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
