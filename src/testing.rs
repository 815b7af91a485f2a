//! In-process test fakes: a channel-backed `Transport` plus a small
//! "scripted server" API for driving it, so the supervisor, coordinator,
//! and worker pumps can be exercised end-to-end without a real socket.
//!
//! The teacher ships no test tooling at all. This follows the pattern
//! used across the broader retrieved pack for exercising streaming
//! clients: wrap the transport seam in channels and let the test play
//! the server.

use async_trait::async_trait;
use rmpv::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::encode_value;
use crate::ticker::{FakeTicker, Ticker, TickerFactory};
use crate::transport::{Transport, TransportFactory};

pub struct FakeTransport {
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
    ping_should_fail: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

pub struct FakeServer {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
    ping_should_fail: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let ping_should_fail = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inbound_rx: Mutex::new(rx),
                outbound: outbound.clone(),
                ping_should_fail: ping_should_fail.clone(),
                closed: closed.clone(),
            },
            FakeServer {
                inbound_tx: Mutex::new(Some(tx)),
                outbound,
                ping_should_fail,
                closed,
            },
        )
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn read(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        let mut rx = self.inbound_rx.lock().unwrap_or_else(|e| e.into_inner());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("read cancelled"),
            msg = rx.recv() => msg.ok_or_else(|| anyhow::anyhow!("fake transport closed")),
        }
    }

    async fn write(&self, data: Vec<u8>, cancel: &CancellationToken) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("write cancelled");
        }
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).push(data);
        Ok(())
    }

    async fn ping(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        if self.ping_should_fail.swap(false, Ordering::SeqCst) {
            anyhow::bail!("fake ping failure");
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl FakeServer {
    fn send_raw(&self, value: Value) {
        if let Some(tx) = self.inbound_tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(encode_value(&Value::Array(vec![value])));
        }
    }

    fn map(pairs: Vec<(&str, Value)>) -> Value {
        Value::Map(pairs.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
    }

    pub fn send_welcome(&self) {
        self.send_raw(Self::map(vec![("T", Value::from("success")), ("msg", Value::from("connected"))]));
    }

    pub fn send_authenticated(&self) {
        self.send_raw(Self::map(vec![("T", Value::from("success")), ("msg", Value::from("authenticated"))]));
    }

    pub fn send_error(&self, code: i64, msg: &str) {
        self.send_raw(Self::map(vec![
            ("T", Value::from("error")),
            ("code", Value::from(code)),
            ("msg", Value::from(msg)),
        ]));
    }

    pub fn send_subscription(&self, kinds: &[(&str, &[&str])]) {
        let mut pairs = vec![("T", Value::from("subscription"))];
        for (kind, symbols) in kinds {
            pairs.push((kind, Value::Array(symbols.iter().map(|s| Value::from(*s)).collect())));
        }
        self.send_raw(Self::map(pairs));
    }

    pub fn send_trade(&self, id: i64, symbol: &str) {
        self.send_raw(Self::map(vec![
            ("T", Value::from("t")),
            ("i", Value::from(id)),
            ("S", Value::from(symbol)),
            ("p", Value::from(10.5)),
            ("s", Value::from(1.0)),
        ]));
    }

    /// Simulates an unexpected connection loss: the next `read()` on the
    /// paired `FakeTransport` observes EOF.
    pub fn disconnect(&self) {
        self.inbound_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn fail_next_ping(&self) {
        self.ping_should_fail.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn written_frame_count(&self) -> usize {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn take_written_frames(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// A `TransportFactory` that hands out pre-built transports from a queue,
/// one per dial, so a test can script successive epochs (e.g. a first
/// transport that dies, then a second that succeeds).
pub struct FakeTransportFactory {
    queue: Mutex<std::collections::VecDeque<anyhow::Result<Arc<dyn Transport>>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push_transport(&self, transport: Arc<dyn Transport>) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(Ok(transport));
    }

    pub fn push_dial_error(&self, msg: impl Into<String>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(anyhow::anyhow!(msg.into())));
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn dial(&self, _url: &str) -> anyhow::Result<Arc<dyn Transport>> {
        match self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            Some(Ok(t)) => Ok(t),
            Some(Err(e)) => Err(e),
            None => anyhow::bail!("fake transport factory exhausted"),
        }
    }
}

/// A `TickerFactory` that records every ticker it creates (one per
/// epoch, since the supervisor makes a fresh one per connection) so a
/// test can fire a ping tick on whichever epoch is currently running.
#[derive(Default)]
pub struct FakeTickerFactory {
    senders: Mutex<Vec<mpsc::Sender<()>>>,
}

impl FakeTickerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends one tick to the most recently created ticker (the running
    /// epoch's pinger), causing its next `transport.ping` to fire.
    pub async fn tick_latest(&self) {
        let sender = self.senders.lock().unwrap_or_else(|e| e.into_inner()).last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }
}

impl TickerFactory for FakeTickerFactory {
    fn new_ticker(&self, _period: std::time::Duration) -> Box<dyn Ticker> {
        let (ticker, sender) = FakeTicker::new();
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).push(sender);
        Box::new(ticker)
    }
}
