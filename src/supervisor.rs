//! The top-level epoch loop: dial, initialize, spawn the worker fleet,
//! wait, decide. Bounded retry, linear backoff, irrecoverable-error
//! classification, and a handshake with subscription replay across
//! reconnects.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientCallbacks, ClientConfig};
use crate::coordinator::SharedCoordinator;
use crate::dispatcher::DispatchContext;
use crate::error::{is_irrecoverable_dial_error, ClientError};
use crate::feed::SharedFeedHandlers;
use crate::metrics::RuntimeMetrics;
use crate::ticker::TickerFactory;
use crate::transport::TransportFactory;
use crate::{init, workers};

/// The resolved state of `Client::terminated()`. `Pending` until the
/// supervisor loop exits exactly once.
#[derive(Clone, Debug)]
pub enum Termination {
    Pending,
    Done(Option<ClientError>),
}

pub type TerminatedReceiver = watch::Receiver<Termination>;

pub struct Supervisor {
    pub cfg: Arc<ClientConfig>,
    pub transport_factory: Arc<dyn TransportFactory>,
    pub handlers: SharedFeedHandlers,
    pub callbacks: ClientCallbacks,
    pub coordinator: SharedCoordinator,
    pub metrics: Arc<RuntimeMetrics>,
    pub ticker_factory: Arc<dyn TickerFactory>,
    pub cancel: CancellationToken,
}

impl Supervisor {
    /// Runs the epoch loop to completion. `initial_result_tx` is resolved
    /// exactly once, with the outcome of the first successful (or
    /// terminally failed) connection attempt. `terminated_tx` is resolved
    /// at most once, only if at least one connection ever succeeded, and
    /// is created by the caller so `Client::connect` can hand out a
    /// receiver before the loop finishes.
    pub async fn run(mut self, initial_result_tx: oneshot::Sender<Result<(), ClientError>>, terminated_tx: watch::Sender<Termination>) {
        let mut initial_result_tx = Some(initial_result_tx);
        let mut failed_attempts_in_a_row: u32 = 0;
        let mut connected_at_least_once = false;

        loop {
            if self.cancel.is_cancelled() {
                let outcome = if connected_at_least_once {
                    Ok(())
                } else {
                    Err(ClientError::CancelledBeforeConnect(
                        "client cancelled before a connection could be established".into(),
                    ))
                };
                self.finish(outcome, connected_at_least_once, &mut initial_result_tx, &terminated_tx)
                    .await;
                break;
            }

            if self.cfg.reconnect_limit != 0 && failed_attempts_in_a_row >= self.cfg.reconnect_limit {
                let outcome = Err(ClientError::MaxReconnectsReached(format!(
                    "reached reconnect limit of {} after {} failed attempts in a row",
                    self.cfg.reconnect_limit, failed_attempts_in_a_row
                )));
                self.finish(outcome, connected_at_least_once, &mut initial_result_tx, &terminated_tx)
                    .await;
                break;
            }

            let backoff = crate::util::backoff_delay(failed_attempts_in_a_row, self.cfg.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => continue,
            }
            failed_attempts_in_a_row += 1;

            let transport = match self.transport_factory.dial(&self.cfg.url).await {
                Ok(t) => t,
                Err(e) => {
                    if is_irrecoverable_dial_error(&e) {
                        let outcome = Err(ClientError::Transport(e.to_string()).into_irrecoverable());
                        self.finish(outcome, connected_at_least_once, &mut initial_result_tx, &terminated_tx)
                            .await;
                        break;
                    }
                    log::warn!(target: "market_stream::supervisor", "dial failed, retrying: {e}");
                    continue;
                }
            };

            let epoch_cancel = self.cancel.child_token();
            let init_result = init::initialize(transport.as_ref(), &self.cfg, &self.coordinator, &epoch_cancel).await;
            if let Err(e) = init_result {
                transport.close().await;
                if e.is_irrecoverable() {
                    let outcome = Err(e.into_irrecoverable());
                    self.finish(outcome, connected_at_least_once, &mut initial_result_tx, &terminated_tx)
                        .await;
                    break;
                }
                log::warn!(target: "market_stream::supervisor", "initialization failed, retrying: {e}");
                continue;
            }

            if connected_at_least_once {
                self.metrics.ws_reconnects.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(tx) = initial_result_tx.take() {
                let _ = tx.send(Ok(()));
                connected_at_least_once = true;
                if let Some(cb) = &self.callbacks.on_connect {
                    cb();
                }
            }
            failed_attempts_in_a_row = 0;
            self.metrics.ws_connections_active.fetch_add(1, Ordering::Relaxed);

            self.run_epoch(transport, epoch_cancel).await;
            self.metrics.ws_connections_active.fetch_sub(1, Ordering::Relaxed);
            if let Some(cb) = &self.callbacks.on_disconnect {
                cb();
            }
        }
    }

    async fn finish(
        &self,
        outcome: Result<(), ClientError>,
        connected_at_least_once: bool,
        initial_result_tx: &mut Option<oneshot::Sender<Result<(), ClientError>>>,
        terminated_tx: &watch::Sender<Termination>,
    ) {
        self.coordinator.mark_terminated().await;
        if let Some(tx) = initial_result_tx.take() {
            let _ = tx.send(outcome.clone());
        }
        if connected_at_least_once {
            let _ = terminated_tx.send(Termination::Done(outcome.err()));
        }
    }

    /// Spawns the full N+3 worker fleet for one connection and waits for
    /// all of them to exit before returning.
    async fn run_epoch(&self, transport: Arc<dyn crate::transport::Transport>, epoch_cancel: CancellationToken) {
        let (in_tx, in_rx) = mpsc::channel(self.cfg.buffer_size.max(1));
        let in_rx = Arc::new(Mutex::new(in_rx));
        let ctx = Arc::new(DispatchContext {
            handlers: self.handlers.clone(),
            coordinator: self.coordinator.clone(),
            metrics: self.metrics.clone(),
        });

        let mut tasks = JoinSet::new();

        tasks.spawn(workers::run_reader(
            transport.clone(),
            in_tx,
            epoch_cancel.clone(),
            self.metrics.clone(),
            self.callbacks.clone(),
        ));
        tasks.spawn(workers::run_writer(
            transport.clone(),
            self.coordinator.clone(),
            epoch_cancel.clone(),
            self.cfg.write_timeout,
        ));
        tasks.spawn(workers::run_pinger(
            transport.clone(),
            self.ticker_factory.new_ticker(self.cfg.ping_period),
            epoch_cancel.clone(),
            self.cfg.ping_timeout,
        ));
        for _ in 0..self.cfg.processor_count {
            tasks.spawn(workers::run_processor(in_rx.clone(), ctx.clone()));
        }

        while tasks.join_next().await.is_some() {}
    }
}
