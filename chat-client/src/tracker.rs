//! Transaction tracker.
//!
//! Follows each submitted write through `Submitted -> Confirming ->
//! Confirmed | Failed`. Waiting for inclusion never blocks the caller: every
//! write gets a spawned observer that applies the confirmation deadline and
//! the settle delay, then fires the registered one-shot callbacks.
//!
//! Callbacks are tagged with the epoch they were registered in. After
//! [`TransactionTracker::cancel_callbacks`] nothing registered earlier fires.
//!
//! Terminal writes stay queryable for a retention window and are dropped on
//! a later submit.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talk2me_chat_core::{advance, TxEvent};
use talk2me_chat_types::{
    LedgerError, PendingTransaction, TransactionId, TxHash, TxPurpose, TxStatus, WriteCall,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gateway::{Ledger, LedgerGateway};

/// How long a terminal write stays queryable by default.
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(300);

/// Callback fired once a write is confirmed and settled.
pub type ConfirmedCallback = Box<dyn FnOnce(&PendingTransaction) + Send + Sync>;

/// Callback fired once a write failed.
pub type FailedCallback = Box<dyn FnOnce(&PendingTransaction, &LedgerError) + Send + Sync>;

struct Tracked {
    tx: PendingTransaction,
    error: Option<LedgerError>,
    on_confirmed: Vec<(u64, ConfirmedCallback)>,
    on_failed: Vec<(u64, FailedCallback)>,
    status: watch::Sender<TxStatus>,
    finished_at: Option<Instant>,
}

/// Tracks writes until they reach a terminal state.
pub struct TransactionTracker<L> {
    gateway: Arc<LedgerGateway<L>>,
    txs: Arc<DashMap<TransactionId, Tracked>>,
    epoch: Arc<AtomicU64>,
    settle_delay: Duration,
    deadline: Duration,
    retention: Duration,
}

impl<L> Clone for TransactionTracker<L> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            txs: Arc::clone(&self.txs),
            epoch: Arc::clone(&self.epoch),
            settle_delay: self.settle_delay,
            deadline: self.deadline,
            retention: self.retention,
        }
    }
}

impl<L: Ledger + 'static> TransactionTracker<L> {
    /// Create a tracker.
    ///
    /// `deadline` bounds the wait for inclusion; `settle_delay` is waited
    /// after inclusion before the write counts as confirmed, so reads issued
    /// from callbacks observe it.
    pub fn new(gateway: Arc<LedgerGateway<L>>, settle_delay: Duration, deadline: Duration) -> Self {
        Self {
            gateway,
            txs: Arc::new(DashMap::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            settle_delay,
            deadline,
            retention: TERMINAL_RETENTION,
        }
    }

    /// Keep terminal writes queryable for `retention` instead of the default.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Issue `call` and start tracking it.
    ///
    /// Write errors (rejected signature, provider failure) are returned here
    /// and nothing is tracked.
    pub async fn submit(
        &self,
        purpose: TxPurpose,
        call: WriteCall,
    ) -> Result<TransactionId, LedgerError> {
        self.prune();
        let hash = self.gateway.write_call(&call).await?;
        let id = TransactionId::new();
        let (status, _) = watch::channel(TxStatus::Submitted);
        self.txs.insert(
            id,
            Tracked {
                tx: PendingTransaction {
                    id,
                    purpose,
                    hash,
                    status: TxStatus::Submitted,
                },
                error: None,
                on_confirmed: Vec::new(),
                on_failed: Vec::new(),
                status,
                finished_at: None,
            },
        );
        info!(%id, %purpose, %hash, "Transaction submitted");

        self.transition(id, TxEvent::Confirming, None);

        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.observe(id, hash).await;
        });
        Ok(id)
    }

    async fn observe(&self, id: TransactionId, hash: TxHash) {
        let outcome = match tokio::time::timeout(
            self.deadline,
            self.gateway.await_confirmation(&hash),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(%id, settle_ms = self.settle_delay.as_millis() as u64, "Included, settling");
                tokio::time::sleep(self.settle_delay).await;
                Ok(())
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(LedgerError::Timeout),
        };

        match outcome {
            Ok(()) => self.transition(id, TxEvent::Confirmed, None),
            Err(error) => self.transition(id, TxEvent::Failed, Some(error)),
        }
    }

    /// Apply `event` to `id` and fire callbacks on a terminal transition.
    fn transition(&self, id: TransactionId, event: TxEvent, error: Option<LedgerError>) {
        let (tx, confirmed, failed) = {
            let Some(mut entry) = self.txs.get_mut(&id) else {
                return;
            };
            let next = match advance(entry.tx.status, event) {
                Ok(next) => next,
                Err(e) => {
                    warn!(%id, error = %e, "Ignoring transaction event");
                    return;
                }
            };
            entry.tx.status = next;
            if error.is_some() {
                entry.error = error.clone();
            }
            entry.status.send_replace(next);

            let confirmed = match next {
                TxStatus::Confirmed => std::mem::take(&mut entry.on_confirmed),
                _ => Vec::new(),
            };
            let failed = match next {
                TxStatus::Failed => std::mem::take(&mut entry.on_failed),
                _ => Vec::new(),
            };
            if next.is_terminal() {
                entry.on_confirmed.clear();
                entry.on_failed.clear();
                entry.finished_at = Some(Instant::now());
            }
            (entry.tx.clone(), confirmed, failed)
        };

        match tx.status {
            TxStatus::Confirmed => info!(%id, purpose = %tx.purpose, "Transaction confirmed"),
            TxStatus::Failed => warn!(
                %id,
                purpose = %tx.purpose,
                error = ?error,
                "Transaction failed"
            ),
            status => debug!(%id, ?status, "Transaction progressed"),
        }

        // Callbacks run outside the map lock; they may submit new writes.
        let epoch = self.epoch.load(Ordering::SeqCst);
        for (registered, callback) in confirmed {
            if registered == epoch {
                callback(&tx);
            }
        }
        if let Some(error) = error {
            for (registered, callback) in failed {
                if registered == epoch {
                    callback(&tx, &error);
                }
            }
        }
    }

    /// Run `callback` once `id` is confirmed.
    ///
    /// Fires immediately if it already is; never fires if it failed.
    pub fn on_confirmed<F>(&self, id: TransactionId, callback: F)
    where
        F: FnOnce(&PendingTransaction) + Send + Sync + 'static,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let snapshot = match self.txs.get_mut(&id) {
            Some(mut entry) if !entry.tx.status.is_terminal() => {
                entry.on_confirmed.push((epoch, Box::new(callback)));
                return;
            }
            Some(entry) => entry.tx.clone(),
            None => {
                debug!(%id, "Callback for unknown transaction dropped");
                return;
            }
        };
        if snapshot.status == TxStatus::Confirmed {
            callback(&snapshot);
        }
    }

    /// Run `callback` once `id` failed.
    ///
    /// Fires immediately if it already has; never fires if it was confirmed.
    pub fn on_failed<F>(&self, id: TransactionId, callback: F)
    where
        F: FnOnce(&PendingTransaction, &LedgerError) + Send + Sync + 'static,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let snapshot = match self.txs.get_mut(&id) {
            Some(mut entry) if !entry.tx.status.is_terminal() => {
                entry.on_failed.push((epoch, Box::new(callback)));
                return;
            }
            Some(entry) => (entry.tx.clone(), entry.error.clone()),
            None => {
                debug!(%id, "Callback for unknown transaction dropped");
                return;
            }
        };
        if let (tx, Some(error)) = snapshot {
            if tx.status == TxStatus::Failed {
                callback(&tx, &error);
            }
        }
    }

    /// Current status of `id`.
    pub fn status(&self, id: TransactionId) -> Option<TxStatus> {
        self.txs.get(&id).map(|e| e.tx.status)
    }

    /// Snapshot of `id`.
    pub fn get(&self, id: TransactionId) -> Option<PendingTransaction> {
        self.txs.get(&id).map(|e| e.tx.clone())
    }

    /// Failure recorded for `id`, if it failed.
    pub fn error(&self, id: TransactionId) -> Option<LedgerError> {
        self.txs.get(&id).and_then(|e| e.error.clone())
    }

    /// Wait until `id` reaches a terminal state.
    ///
    /// Returns `None` for unknown ids and ids already pruned.
    pub async fn wait(&self, id: TransactionId) -> Option<PendingTransaction> {
        let mut status = self.txs.get(&id).map(|e| e.status.subscribe())?;
        // Entries are only pruned once terminal, and the terminal value is
        // sent before that.
        let _ = status.wait_for(TxStatus::is_terminal).await;
        self.get(id)
    }

    /// Writes not yet terminal.
    pub fn pending(&self) -> Vec<PendingTransaction> {
        self.txs
            .iter()
            .filter(|e| !e.tx.status.is_terminal())
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Number of writes tracked, terminal ones included.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Forget terminal writes older than the retention window.
    fn prune(&self) {
        let before = self.txs.len();
        self.txs.retain(|_, t| match t.finished_at {
            Some(finished) => finished.elapsed() < self.retention,
            None => true,
        });
        let pruned = before.saturating_sub(self.txs.len());
        if pruned > 0 {
            debug!(pruned, "Pruned finished transactions");
        }
    }

    /// Drop every registered callback.
    ///
    /// Tracking continues; only the subscriptions are cancelled.
    pub fn cancel_callbacks(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for mut entry in self.txs.iter_mut() {
            entry.on_confirmed.clear();
            entry.on_failed.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContractsConfig;
    use crate::gateway::MockLedger;
    use std::sync::atomic::AtomicUsize;

    const SETTLE: Duration = Duration::from_millis(1000);
    const DEADLINE: Duration = Duration::from_secs(45);

    fn tracker(ledger: &MockLedger) -> TransactionTracker<MockLedger> {
        let gateway = Arc::new(LedgerGateway::new(
            ledger.clone(),
            ContractsConfig::default(),
        ));
        TransactionTracker::new(gateway, SETTLE, DEADLINE)
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&c), c)
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn submit_reaches_confirming_then_confirmed() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);

        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        assert_eq!(tracker.status(id), Some(TxStatus::Confirming));

        let tx = tracker.wait(id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.purpose, TxPurpose::Join);
        assert!(tracker.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_waits_for_settle_delay() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);
        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(tracker.status(id), Some(TxStatus::Confirming));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(tracker.status(id), Some(TxStatus::Confirmed));
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_write_fails() {
        let ledger = MockLedger::new();
        ledger.revert_next_receipt("nope");
        let tracker = tracker(&ledger);

        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        let tx = tracker.wait(id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert!(matches!(tracker.error(id), Some(LedgerError::Reverted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_at_deadline() {
        let ledger = MockLedger::new();
        ledger.stall_next_confirmation();
        let tracker = tracker(&ledger);

        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();

        tokio::time::sleep(DEADLINE - Duration::from_secs(1)).await;
        assert_eq!(tracker.status(id), Some(TxStatus::Confirming));

        let tx = tracker.wait(id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tracker.error(id), Some(LedgerError::Timeout));
    }

    #[tokio::test]
    async fn write_errors_propagate_untracked() {
        let ledger = MockLedger::new();
        ledger.reject_next_signature();
        let tracker = tracker(&ledger);

        let err = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::UserRejectedSignature);
        assert!(tracker.pending().is_empty());
    }

    // ===========================================
    // Callbacks
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn confirmed_callback_fires_once() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);
        let (fired, seen) = counter();
        let (failed, failed_seen) = counter();

        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tracker.on_confirmed(id, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        tracker.on_failed(id, move |_, _| {
            failed.fetch_add(1, Ordering::SeqCst);
        });

        tracker.wait(id).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(failed_seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_callback_fires_immediately() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);
        let id = tracker
            .submit(TxPurpose::Send, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tracker.wait(id).await;

        let (fired, seen) = counter();
        tracker.on_confirmed(id, move |tx| {
            assert_eq!(tx.status, TxStatus::Confirmed);
            fired.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_callback_receives_error() {
        let ledger = MockLedger::new();
        ledger.revert_next_receipt("bad");
        let tracker = tracker(&ledger);
        let (fired, seen) = counter();

        let id = tracker
            .submit(TxPurpose::CreateRoom, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tracker.on_failed(id, move |tx, error| {
            assert_eq!(tx.purpose, TxPurpose::CreateRoom);
            assert!(matches!(error, LedgerError::Reverted(_)));
            fired.fetch_add(1, Ordering::SeqCst);
        });
        tracker.wait(id).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_callbacks_never_fire() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);
        let (fired, seen) = counter();

        let id = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tracker.on_confirmed(id, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        tracker.cancel_callbacks();

        let tx = tracker.wait(id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    // ===========================================
    // Retention
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn finished_writes_are_pruned_after_retention() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger).with_retention(Duration::from_secs(60));

        let old = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tracker.wait(old).await;

        // Still queryable inside the window.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let recent = tracker
            .submit(TxPurpose::Send, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        assert_eq!(tracker.status(old), Some(TxStatus::Confirmed));
        assert_eq!(tracker.len(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let newest = tracker
            .submit(TxPurpose::Send, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        assert!(tracker.status(old).is_none());
        assert_eq!(tracker.status(recent), Some(TxStatus::Confirmed));
        assert!(tracker.status(newest).is_some());
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_writes_are_never_pruned() {
        let ledger = MockLedger::new();
        ledger.stall_next_confirmation();
        let tracker = tracker(&ledger).with_retention(Duration::from_secs(1));

        let stalled = tracker
            .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        tracker
            .submit(TxPurpose::Send, WriteCall::JoinGlobalRoom)
            .await
            .unwrap();

        assert_eq!(tracker.status(stalled), Some(TxStatus::Confirming));
        assert_eq!(tracker.pending().len(), 2);
    }

    #[tokio::test]
    async fn unknown_id_has_no_status() {
        let ledger = MockLedger::new();
        let tracker = tracker(&ledger);
        let id = TransactionId::new();
        assert!(tracker.status(id).is_none());
        assert!(tracker.wait(id).await.is_none());
    }
}
