//! The subscription coordinator: owns `desired_sub`, the at-most-one
//! `pending_sub_change`, and the sub-change request/response rendezvous.
//!
//! The rendezvous itself (`oneshot` + `tokio::select!` with a timeout)
//! follows the common pattern for request/response over a streaming
//! connection where replies arrive on the same inbound stream as
//! everything else.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Duration;

use crate::codec::build_action_frame;
use crate::error::ClientError;
use crate::metrics::RuntimeMetrics;
use crate::schema::{DesiredSub, StreamKind};

struct PendingSubChange {
    frame: Arc<Vec<u8>>,
    result_tx: oneshot::Sender<Result<(), ClientError>>,
}

struct CoordState {
    desired_sub: DesiredSub,
    pending: Option<PendingSubChange>,
    has_terminated: bool,
}

/// Shared, clonable handle to the coordinator.
pub type SharedCoordinator = Arc<SubscriptionCoordinator>;

pub struct SubscriptionCoordinator {
    state: Mutex<CoordState>,
    sub_changes_tx: mpsc::Sender<Arc<Vec<u8>>>,
    sub_changes_rx: Mutex<mpsc::Receiver<Arc<Vec<u8>>>>,
    metrics: Arc<RuntimeMetrics>,
}

impl SubscriptionCoordinator {
    pub fn new(metrics: Arc<RuntimeMetrics>) -> SharedCoordinator {
        let (tx, rx) = mpsc::channel(1);
        Arc::new(Self {
            state: Mutex::new(CoordState {
                desired_sub: DesiredSub::default(),
                pending: None,
                has_terminated: false,
            }),
            sub_changes_tx: tx,
            sub_changes_rx: Mutex::new(rx),
            metrics,
        })
    }

    /// A clone of the current authoritative subscription set, e.g. for
    /// the initialization flow's re-subscribe step.
    pub async fn desired_sub_snapshot(&self) -> DesiredSub {
        self.state.lock().await.desired_sub.clone()
    }

    /// The receiver end of `sub_changes`, for the writer to select on.
    /// Locked for the duration of one epoch's writer task.
    pub fn sub_changes_receiver(&self) -> &Mutex<mpsc::Receiver<Arc<Vec<u8>>>> {
        &self.sub_changes_rx
    }

    /// Submits a subscribe/unsubscribe request for one kind and waits for
    /// the server to acknowledge it (or for the round trip to time out).
    /// `connect_called`/empty-symbol short-circuiting is the caller's
    /// (client façade's) responsibility: this only enforces the
    /// coordinator-level invariants from §4.8 step 3 onward.
    pub async fn request_change(
        self: &Arc<Self>,
        kind: StreamKind,
        symbols: &[String],
        subscribe: bool,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut delta = DesiredSub::default();
        *delta.kind_mut(kind) = symbols.iter().cloned().collect();
        let action = if subscribe { "subscribe" } else { "unsubscribe" };
        let frame = Arc::new(build_action_frame(action, &delta));

        let result_rx = {
            let mut state = self.state.lock().await;
            if state.has_terminated {
                return Err(ClientError::SubscriptionChangeAfterTerminated);
            }
            if state.pending.is_some() {
                return Err(ClientError::SubscriptionChangeAlreadyInProgress);
            }
            let (tx, rx) = oneshot::channel();
            state.pending = Some(PendingSubChange {
                frame: frame.clone(),
                result_tx: tx,
            });
            rx
        };

        // The invariant above guarantees the 1-slot channel is free: no
        // other producer can be mid-send while `pending` was `None`.
        if self.sub_changes_tx.send(frame).await.is_err() {
            // The writer side only ever holds the receiver for the
            // lifetime of the coordinator; a closed channel means the
            // client has been dropped entirely.
            return Err(ClientError::SubscriptionChangeInterrupted);
        }
        self.metrics.subscriptions_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        tokio::select! {
            res = result_rx => match res {
                Ok(result) => result,
                Err(_) => Err(ClientError::SubscriptionChangeInterrupted),
            },
            _ = tokio::time::sleep(timeout) => {
                let mut state = self.state.lock().await;
                state.pending = None;
                Err(ClientError::SubscriptionChangeTimeout)
            }
        }
    }

    /// Called by the writer at the start of every epoch: if a sub-change
    /// is still pending from a prior (dead) epoch, drain any stale
    /// leftover frame and re-enqueue the pending one so the new
    /// connection is guaranteed to see it.
    pub async fn replay_pending_on_reconnect(&self) {
        let pending_frame = {
            let state = self.state.lock().await;
            state.pending.as_ref().map(|p| p.frame.clone())
        };
        let Some(frame) = pending_frame else { return };
        let mut rx = self.sub_changes_rx.lock().await;
        while rx.try_recv().is_ok() {}
        let _ = self.sub_changes_tx.send(frame).await;
    }

    /// Handles a server-acknowledged `{T:"subscription", ...}` frame: the
    /// only event allowed to mutate `desired_sub`.
    pub async fn handle_subscription_frame(&self, echoed: DesiredSub) {
        let mut state = self.state.lock().await;
        state.desired_sub = echoed;
        if let Some(pending) = state.pending.take() {
            let _ = pending.result_tx.send(Ok(()));
        }
    }

    /// Handles a server `{T:"error", code, msg}` frame. If a sub-change
    /// is pending, it is resolved with the mapped error and cleared; the
    /// connection itself is left untouched (§7: "Sub-change errors from
    /// the server resolve the pending sub-change... and leave the
    /// connection healthy").
    pub async fn handle_error_frame(&self, code: i64, msg: &str) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.take() {
            self.metrics.subscription_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let _ = pending.result_tx.send(Err(ClientError::from_server_code(code, msg)));
        }
    }

    /// Called once, from the supervisor's termination cleanup: fails any
    /// still-pending change with the interruption error and marks the
    /// coordinator terminated so future requests are rejected outright.
    pub async fn mark_terminated(&self) {
        let mut state = self.state.lock().await;
        state.has_terminated = true;
        if let Some(pending) = state.pending.take() {
            let _ = pending.result_tx.send(Err(ClientError::SubscriptionChangeInterrupted));
        }
    }

    #[cfg(test)]
    pub async fn has_terminated(&self) -> bool {
        self.state.lock().await.has_terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn at_most_one_pending_change() {
        let coord = SubscriptionCoordinator::new(RuntimeMetrics::new_shared());
        let c1 = coord.clone();
        let first = tokio::spawn(async move {
            c1.request_change(StreamKind::Trades, &["AL".into()], true, Duration::from_secs(5))
                .await
        });
        // Give the first request a moment to install its pending entry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = coord
            .request_change(StreamKind::Trades, &["PACA".into()], true, Duration::from_secs(5))
            .await;
        assert!(matches!(second, Err(ClientError::SubscriptionChangeAlreadyInProgress)));

        let mut sub = DesiredSub::default();
        sub.trades.insert("AL".to_string());
        coord.handle_subscription_frame(sub).await;
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn timeout_clears_pending() {
        let coord = SubscriptionCoordinator::new(RuntimeMetrics::new_shared());
        let result = coord
            .request_change(StreamKind::Trades, &["AL".into()], true, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(ClientError::SubscriptionChangeTimeout)));

        // A fresh request is immediately possible afterwards.
        let c2 = coord.clone();
        let retry = tokio::spawn(async move {
            c2.request_change(StreamKind::Trades, &["AL".into()], true, Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut sub = DesiredSub::default();
        sub.trades.insert("AL".to_string());
        coord.handle_subscription_frame(sub).await;
        assert!(retry.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn server_error_resolves_pending_without_touching_desired_sub() {
        let coord = SubscriptionCoordinator::new(RuntimeMetrics::new_shared());
        let c1 = coord.clone();
        let fut = tokio::spawn(async move {
            c1.request_change(StreamKind::Trades, &["PACOIN".into()], true, Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.handle_error_frame(405, "symbol limit exceeded").await;
        let result = fut.await.unwrap();
        assert!(matches!(result, Err(ClientError::SymbolLimitExceeded)));
        assert!(coord.desired_sub_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn termination_interrupts_pending_and_rejects_future_requests() {
        let coord = SubscriptionCoordinator::new(RuntimeMetrics::new_shared());
        let c1 = coord.clone();
        let fut = tokio::spawn(async move {
            c1.request_change(StreamKind::Trades, &["PACOIN".into()], true, Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.mark_terminated().await;
        assert!(matches!(fut.await.unwrap(), Err(ClientError::SubscriptionChangeInterrupted)));

        let after = coord
            .request_change(StreamKind::Trades, &["AL".into()], true, Duration::from_secs(5))
            .await;
        assert!(matches!(after, Err(ClientError::SubscriptionChangeAfterTerminated)));
    }
}
