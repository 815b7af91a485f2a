//! Minimal end-to-end usage of `market_stream_core`: connect, subscribe
//! to trades for a couple of symbols, log everything that arrives, and
//! exit cleanly on Ctrl-C.
//!
//! Mirrors the teacher's `main.rs` bring-up sequence (install the rustls
//! crypto provider once, load config, run forever) but against the new
//! single-connection `Client` instead of a multi-exchange collector
//! fleet.

use std::sync::Arc;

use market_stream_core::client::{Client, ClientDeps};
use market_stream_core::config::{ClientCallbacks, ClientConfig};
use market_stream_core::transport::{ensure_crypto_provider_installed, TungsteniteTransportFactory};
use market_stream_core::util::{env_or, normalize_ws_scheme};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    ensure_crypto_provider_installed();

    let raw_url = env_or("MARKET_STREAM_URL").unwrap_or_else(|| "https://example.com/v2/iex".to_string());
    let url = normalize_ws_scheme(url::Url::parse(&raw_url)?);
    let key = env_or("APCA_API_KEY_ID").unwrap_or_default();
    let secret = env_or("APCA_API_SECRET_KEY").unwrap_or_default();

    let cfg = ClientConfig::builder(url.to_string(), key, secret).build();
    let deps = ClientDeps {
        transport_factory: Arc::new(TungsteniteTransportFactory::new(cfg.user_agent.clone())),
        callbacks: ClientCallbacks {
            on_connect: Some(Arc::new(|| log::info!("connected"))),
            on_disconnect: Some(Arc::new(|| log::warn!("disconnected, will attempt to reconnect"))),
            on_buffer_fill: Some(Arc::new(|n| log::warn!("inbound buffer is full at {n} bytes, consumer is falling behind"))),
        },
    };
    let client = Arc::new(Client::new(cfg, deps));

    let cancel = CancellationToken::new();
    let cancel_for_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutting down");
        cancel_for_ctrlc.cancel();
    });

    // `connect` resolves once the first connection succeeds (or fails
    // terminally); only afterwards is it worth submitting a subscription.
    client.connect(cancel).await?;

    client
        .subscribe_to_trades(
            Arc::new(|trade| log::info!("trade: {} @ {} x{}", trade.symbol, trade.price, trade.size)),
            ["AAPL", "ALPACA"],
        )
        .await?;

    let mut terminated = client.terminated();
    terminated.changed().await.ok();
    if let market_stream_core::supervisor::Termination::Done(Some(err)) = terminated.borrow().clone() {
        log::error!("client terminated: {err}");
    }

    Ok(())
}
