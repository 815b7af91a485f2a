//! Injectable ticker for the pinger, so tests can fire ping ticks on
//! demand instead of waiting on real wall-clock time. A small trait plus
//! two implementations, the same way `transport::TransportFactory`
//! abstracts dialing.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick.
    async fn tick(&mut self);
}

pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Test-controlled ticker: ticks only when the test sends on the paired
/// sender, never on its own.
pub struct FakeTicker {
    rx: mpsc::Receiver<()>,
}

impl FakeTicker {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { rx }, tx)
    }
}

#[async_trait]
impl Ticker for FakeTicker {
    async fn tick(&mut self) {
        // A closed sender means the test dropped its handle; block forever
        // rather than spin, matching "no more ticks will ever come".
        match self.rx.recv().await {
            Some(()) => {}
            None => std::future::pending::<()>().await,
        }
    }
}

pub trait TickerFactory: Send + Sync {
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

pub struct RealTickerFactory;

impl TickerFactory for RealTickerFactory {
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker> {
        Box::new(IntervalTicker::new(period))
    }
}
