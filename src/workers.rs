//! The four kinds of per-epoch worker: reader, writer, pinger, and
//! processor (§4.3-4.6). Spawned and joined by the supervisor as one
//! atomic fleet per connection epoch.
//!
//! Grounded in the teacher's `MasterSender::try_connect`: a spawned
//! reader task that signals the writer on EOF, a writer loop that
//! `select!`s over an outgoing queue and a ping ticker. This splits that
//! single function into four independent tasks sharing one
//! `CancellationToken` instead of a bespoke `Notify`, since the spec
//! requires every blocking operation to observe the same cancellation
//! root rather than just "reader done, stop writing".

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::ClientCallbacks;
use crate::coordinator::SharedCoordinator;
use crate::dispatcher::{dispatch_frame, DispatchContext};
use crate::metrics::RuntimeMetrics;
use crate::ticker::Ticker;
use crate::transport::Transport;

/// Reads frames off the transport and feeds them into the bounded
/// inbound channel. Exits on any read error or cancellation; its exit
/// tears down the rest of the epoch via the shared `CancellationToken`.
pub async fn run_reader(
    transport: Arc<dyn Transport>,
    in_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    metrics: Arc<RuntimeMetrics>,
    callbacks: ClientCallbacks,
) {
    loop {
        let frame = match transport.read(&cancel).await {
            Ok(frame) => frame,
            Err(e) => {
                if !cancel.is_cancelled() {
                    log::info!(target: "market_stream::reader", "read failed, ending epoch: {e}");
                }
                break;
            }
        };
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        match in_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                metrics.dropped_messages.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &callbacks.on_buffer_fill {
                    cb(frame.len());
                }
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    cancel.cancel();
    transport.close().await;
}

/// Drains `sub_changes` (replaying any still-pending request from a dead
/// epoch first) and writes each onto the transport under a per-write
/// deadline.
pub async fn run_writer(
    transport: Arc<dyn Transport>,
    coordinator: SharedCoordinator,
    cancel: CancellationToken,
    write_timeout: std::time::Duration,
) {
    coordinator.replay_pending_on_reconnect().await;
    let mut sub_changes = coordinator.sub_changes_receiver().lock().await;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = sub_changes.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let write = tokio::time::timeout(write_timeout, transport.write((*frame).clone(), &cancel)).await;
        match write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !cancel.is_cancelled() {
                    log::warn!(target: "market_stream::writer", "write failed: {e}");
                }
                break;
            }
            Err(_) => {
                log::warn!(target: "market_stream::writer", "write timed out");
                break;
            }
        }
    }
    cancel.cancel();
    transport.close().await;
}

/// Ticks a ping at a fixed period; exits (and tears down the epoch) on
/// the first failed ping.
pub async fn run_pinger(
    transport: Arc<dyn Transport>,
    mut ticker: Box<dyn Ticker>,
    cancel: CancellationToken,
    ping_timeout: std::time::Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match tokio::time::timeout(ping_timeout, transport.ping(&cancel)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if !cancel.is_cancelled() {
                            log::warn!(target: "market_stream::pinger", "ping failed: {e}");
                        }
                        break;
                    }
                    Err(_) => {
                        log::warn!(target: "market_stream::pinger", "ping timed out");
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
    transport.close().await;
}

/// Consumes frames from the shared inbound receiver and dispatches each
/// to the feed handler / coordinator. With `processor_count > 1`, N of
/// these race on the same receiver (§4.6) and arrival order is no longer
/// preserved.
pub async fn run_processor(in_rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>, ctx: Arc<DispatchContext>) {
    loop {
        let frame = {
            let mut rx = in_rx.lock().await;
            rx.recv().await
        };
        match frame {
            Some(frame) => dispatch_frame(&frame, &ctx).await,
            None => break,
        }
    }
}
