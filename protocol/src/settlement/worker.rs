//! The settlement worker: drains the queue when connectivity returns.
//!
//! One worker per process. Drains are single-flight — a connectivity
//! flap that fires two `Online` events must not produce two concurrent
//! walks over the same queue, so the drain path is guarded by a
//! `try_lock` and the loser simply reports "already running".
//!
//! Every failure mode funnels into the same bookkeeping: remote
//! rejections, transport errors, and timeouts all go through
//! `record_failure`, so the backoff schedule governs them uniformly. A
//! submission that outlives [`SUBMIT_TIMEOUT`] is abandoned (the entry
//! retries later) rather than allowed to starve the rest of the queue.
//!
//! When an entry exhausts its attempt ceiling the intent goes terminally
//! Failed and a [`SettlementNotice`] is emitted for the out-of-band
//! surface (push notification, support queue). The deducted amount is
//! NOT restored to the local ceiling — the payee may still settle their
//! copy of the intent, and releasing the money here would reopen the
//! double-spend window. Reconciliation of failed intents is a bank-side
//! process.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::SUBMIT_TIMEOUT;
use crate::ledger::LedgerEntry;
use crate::payment::intent::IntentStatus;
use crate::settlement::api::{SettlementApi, SubmitFailure};
use crate::storage::db::{DbResult, OpalDb};
use crate::token::TokenStore;

// ---------------------------------------------------------------------------
// Event and report types
// ---------------------------------------------------------------------------

/// Connectivity transitions, as observed by whatever platform layer
/// watches the radio. The worker only acts on `Online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Emitted when an intent fails terminally. Consumed by the node's
/// notification surface; the protocol crate only produces these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementNotice {
    pub txn_id: String,
    pub amount: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed settled this pass.
    pub settled: usize,
    /// Entries that failed and were rescheduled with backoff.
    pub rescheduled: usize,
    /// Entries that exhausted the attempt ceiling this pass.
    pub failed_terminally: usize,
    /// True when another drain already held the lock and this call did
    /// nothing.
    pub skipped: bool,
}

impl DrainReport {
    fn already_running() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SettlementWorker
// ---------------------------------------------------------------------------

/// Drives pending intents through the backend when the device is online.
pub struct SettlementWorker {
    db: OpalDb,
    tokens: Arc<TokenStore>,
    api: Arc<dyn SettlementApi>,
    drain_lock: tokio::sync::Mutex<()>,
    notices: mpsc::UnboundedSender<SettlementNotice>,
}

impl SettlementWorker {
    /// Creates a worker and the receiving half of its notice channel.
    pub fn new(
        db: OpalDb,
        tokens: Arc<TokenStore>,
        api: Arc<dyn SettlementApi>,
    ) -> (Self, mpsc::UnboundedReceiver<SettlementNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        (
            Self {
                db,
                tokens,
                api,
                drain_lock: tokio::sync::Mutex::new(()),
                notices,
            },
            notice_rx,
        )
    }

    /// Event loop: drains once at startup (the device may have queued
    /// payments from a previous run), then reacts to connectivity
    /// transitions until the event channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ConnectivityEvent>) {
        self.on_online().await;

        while let Some(event) = events.recv().await {
            match event {
                ConnectivityEvent::Online => self.on_online().await,
                ConnectivityEvent::Offline => {
                    debug!("connectivity lost; settlement paused");
                }
            }
        }
        info!("connectivity channel closed; settlement worker stopping");
    }

    /// Everything that should happen when the radio comes back: refresh
    /// the ceiling, drain the queue, reconcile the balance. Each step is
    /// independent; one failing does not stop the others.
    async fn on_online(&self) {
        if let Err(e) = self.refresh_auth_token().await {
            error!(error = %e, "token refresh failed");
        }
        match self.settle_all_pending().await {
            Ok(report) if !report.skipped => {
                info!(
                    settled = report.settled,
                    rescheduled = report.rescheduled,
                    failed = report.failed_terminally,
                    "drain pass complete"
                );
            }
            Ok(_) => debug!("drain already in progress; skipped"),
            Err(e) => error!(error = %e, "drain pass failed"),
        }
        if let Err(e) = self.sync_balance().await {
            error!(error = %e, "balance sync failed");
        }
    }

    /// Submits every due queue entry once, oldest key first.
    ///
    /// Single-flight: if a drain is already running this returns
    /// immediately with `skipped = true` instead of queueing behind it —
    /// the running pass is already looking at the same entries.
    pub async fn settle_all_pending(&self) -> DbResult<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return Ok(DrainReport::already_running());
        };

        let now_ms = Utc::now().timestamp_millis() as u64;
        let due = self.db.due_queue_entries(now_ms)?;
        let mut report = DrainReport::default();

        for mut entry in due {
            let mut intent = entry.intent.clone();
            intent.status = IntentStatus::Settling;
            self.db.put_intent(&intent)?;

            let outcome = match timeout(SUBMIT_TIMEOUT, self.api.submit_payment_intent(&intent))
                .await
            {
                Ok(result) => result,
                // A hung submission counts as a transport failure. The
                // backend may still have received it; submission must be
                // idempotent on txn_id, which the backend contract
                // guarantees.
                Err(_) => Err(SubmitFailure::retryable("submission timed out")),
            };

            match outcome {
                Ok(ack) => {
                    intent.status = IntentStatus::Settled;
                    intent.settled_at = Some(ack.settled_at);
                    let record =
                        LedgerEntry::settlement(&intent.txn_id, intent.amount, &ack.reference);
                    self.db.commit_settlement(&intent, &record)?;
                    info!(txn_id = %intent.txn_id, reference = %ack.reference, "intent settled");
                    report.settled += 1;
                }
                Err(failure) => {
                    let failed_at = Utc::now().timestamp_millis() as u64;
                    entry.record_failure(failed_at, &failure.reason);

                    if entry.is_exhausted() {
                        intent.status = IntentStatus::Failed;
                        entry.intent = intent.clone();
                        self.db.commit_terminal_failure(&intent, &entry)?;
                        warn!(
                            txn_id = %intent.txn_id,
                            attempts = entry.attempts,
                            error = %failure.reason,
                            "intent failed terminally"
                        );
                        // Receiver may be gone during shutdown; the
                        // terminal state is already durable either way.
                        let _ = self.notices.send(SettlementNotice {
                            txn_id: intent.txn_id.clone(),
                            amount: intent.amount,
                            attempts: entry.attempts,
                            last_error: entry.last_error.clone(),
                        });
                        report.failed_terminally += 1;
                    } else {
                        intent.status = IntentStatus::Created;
                        entry.intent = intent.clone();
                        self.db.commit_reschedule(&intent, &entry)?;
                        debug!(
                            txn_id = %intent.txn_id,
                            attempts = entry.attempts,
                            next_attempt_at = entry.next_attempt_at,
                            error = %failure.reason,
                            "submission failed; rescheduled"
                        );
                        report.rescheduled += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Asks the backend for a fresh authorization token and installs it
    /// as the sole active one. A declined or failed refresh is logged and
    /// swallowed — the current token (if any) stays usable.
    pub async fn refresh_auth_token(&self) -> DbResult<()> {
        let current_id = self.db.active_token_id()?;
        match self.api.refresh_auth_token(current_id.as_deref()).await {
            Ok(Some(token)) => {
                self.tokens.store_token(&token)?;
                self.db
                    .append_ledger(&LedgerEntry::auth_refresh(&token.id, token.max_amount))?;
                info!(token_id = %token.id, max_amount = token.max_amount, "authorization token refreshed");
            }
            Ok(None) => debug!("backend declined to issue a fresh token"),
            Err(failure) => warn!(error = %failure.reason, "token refresh request failed"),
        }
        Ok(())
    }

    /// Compares the local remaining ceiling against the backend's view
    /// and records any divergence in the ledger. Observational only: the
    /// token is never mutated here — the local ceiling is authoritative
    /// for offline spending, and a drift record is for the audit trail.
    pub async fn sync_balance(&self) -> DbResult<()> {
        let local = self.tokens.remaining_balance()?;
        match self.api.get_balance().await {
            Ok(backend) if backend != local => {
                warn!(local, backend, "balance divergence detected");
                self.db
                    .append_ledger(&LedgerEntry::reconciliation(local, backend))?;
            }
            Ok(_) => debug!(local, "balance in sync"),
            Err(failure) => warn!(error = %failure.reason, "balance query failed"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
