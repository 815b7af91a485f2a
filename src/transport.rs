//! The WebSocket transport abstraction and its default implementation.
//!
//! `Transport` is the seam the supervisor, reader, writer, and pinger all
//! talk through. Tests substitute `crate::testing::FakeTransport`; real
//! clients get `TungsteniteTransport`, built the same way the teacher's
//! `main.rs` and `master_sender.rs` bring up a TLS-backed WebSocket: a
//! process-wide rustls `CryptoProvider` installed once, then
//! `connect_async` per dial.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Once;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_util::sync::CancellationToken;

/// A single full-duplex WebSocket connection. Every operation takes a
/// cancellation token so reads, writes, and pings are all interruptible
/// by the same root the rest of the client observes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads exactly one message frame, ignoring control frames the
    /// underlying socket handles transparently (pong replies, etc).
    async fn read(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>>;

    /// Writes one message frame.
    async fn write(&self, data: Vec<u8>, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Sends a ping and waits only for the local socket to accept it:
    /// this is a liveness probe on write, not a round-trip pong wait;
    /// a genuinely dead peer is instead caught by the next stalled read.
    async fn ping(&self, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Closes the connection. Must be safe to call more than once.
    async fn close(&self);
}

/// Dials a URL and produces a ready `Transport`. Injectable so tests never
/// touch a real socket.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn dial(&self, url: &str) -> anyhow::Result<std::sync::Arc<dyn Transport>>;
}

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Installs the rustls ring `CryptoProvider` exactly once per process.
/// Safe to call redundantly; only the first call has any effect.
pub fn ensure_crypto_provider_installed() {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());
    });
}

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TungsteniteTransport {
    write: Mutex<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Mutex<futures_util::stream::SplitStream<WsStream>>,
}

impl TungsteniteTransport {
    async fn connect(url: &str, user_agent: &str) -> anyhow::Result<Self> {
        ensure_crypto_provider_installed();

        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Content-Type", "application/msgpack".parse()?);
        request.headers_mut().insert("User-Agent", user_agent.parse()?);

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws.split();
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn read(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        let mut read = self.read.lock().await;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => anyhow::bail!("read cancelled"),
                msg = read.next() => msg,
            };
            match next {
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("connection closed by server: {:?}", frame)
                }
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("connection closed (stream ended)"),
            }
        }
    }

    async fn write(&self, data: Vec<u8>, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut write = self.write.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("write cancelled"),
            res = write.send(Message::Binary(data.into())) => res.map_err(Into::into),
        }
    }

    async fn ping(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut write = self.write.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("ping cancelled"),
            res = write.send(Message::Ping(Vec::new().into())) => res.map_err(Into::into),
        }
    }

    async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
    }
}

/// Default transport factory backed by `tokio-tungstenite`.
pub struct TungsteniteTransportFactory {
    pub user_agent: String,
}

impl TungsteniteTransportFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl TransportFactory for TungsteniteTransportFactory {
    async fn dial(&self, url: &str) -> anyhow::Result<std::sync::Arc<dyn Transport>> {
        let transport = TungsteniteTransport::connect(url, &self.user_agent).await?;
        Ok(std::sync::Arc::new(transport))
    }
}
