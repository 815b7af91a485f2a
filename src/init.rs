//! Initialization handshake: welcome -> authenticate (bounded retry) ->
//! subscribe, each step under its own deadline (§4.2).
//!
//! Grounded in the teacher's `MasterSender::try_connect`, which also runs
//! a fixed "send login, then loop" sequence right after dialing; this
//! generalizes that single unconditional login into three sequential,
//! independently-timed, independently-retryable steps.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::codec::{build_action_frame, build_auth_frame, decode_envelope, decode_record, Record};
use crate::config::ClientConfig;
use crate::coordinator::SharedCoordinator;
use crate::error::ClientError;
use crate::transport::Transport;

/// Runs the full handshake against a freshly dialed transport. On
/// success the transport is ready for the worker fleet; on failure the
/// caller (supervisor) closes the transport.
pub async fn initialize(
    transport: &dyn Transport,
    cfg: &ClientConfig,
    coordinator: &SharedCoordinator,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    read_welcome(transport, cfg, cancel).await?;
    authenticate(transport, cfg, cancel).await?;
    subscribe_if_needed(transport, cfg, coordinator, cancel).await?;
    Ok(())
}

async fn read_one_record(
    transport: &dyn Transport,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Record, ClientError> {
    let raw = tokio::time::timeout(timeout, transport.read(cancel))
        .await
        .map_err(|_| ClientError::Transport("timed out waiting for server response".into()))?
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let records = decode_envelope(&raw)?;
    if records.len() != 1 {
        return Err(ClientError::FrameFormat(format!(
            "expected a single-element response array, got {}",
            records.len()
        )));
    }
    decode_record(&records[0])
}

async fn read_welcome(transport: &dyn Transport, cfg: &ClientConfig, cancel: &CancellationToken) -> Result<(), ClientError> {
    match read_one_record(transport, cfg.init_timeout, cancel).await {
        Ok(Record::Welcome) => Ok(()),
        _ => Err(ClientError::NotConnected),
    }
}

async fn authenticate(transport: &dyn Transport, cfg: &ClientConfig, cancel: &CancellationToken) -> Result<(), ClientError> {
    let frame = build_auth_frame(&cfg.key, &cfg.secret, cfg.use_access_token);

    for attempt in 0..cfg.auth_retry_count {
        if attempt > 0 {
            let delay = crate::util::auth_retry_delay(attempt, cfg.auth_retry_delay_multiplier);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ClientError::Transport("cancelled during auth retry".into())),
            }
        }

        transport
            .write(frame.clone(), cancel)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        match read_one_record(transport, cfg.init_timeout, cancel).await {
            Ok(Record::Authenticated) => return Ok(()),
            Ok(Record::ServerError { code, msg }) => {
                let err = ClientError::from_server_code(code, &msg);
                if err.is_retriable_auth_error() {
                    log::warn!(target: "market_stream::init", "auth attempt {attempt} rejected ({err}), retrying");
                    continue;
                }
                return Err(err);
            }
            _ => return Err(ClientError::BadAuthResponse),
        }
    }
    Err(ClientError::ConnectionLimitExceeded)
}

async fn subscribe_if_needed(
    transport: &dyn Transport,
    cfg: &ClientConfig,
    coordinator: &SharedCoordinator,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    let desired = coordinator.desired_sub_snapshot().await;
    if desired.is_empty() {
        return Ok(());
    }

    let frame = build_action_frame("subscribe", &desired);
    transport
        .write(frame, cancel)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    match read_one_record(transport, cfg.init_timeout, cancel).await {
        Ok(Record::Subscription(echoed)) => {
            coordinator.handle_subscription_frame(echoed).await;
            Ok(())
        }
        Ok(Record::ServerError { code, msg }) => Err(ClientError::from_server_code(code, &msg)),
        _ => Err(ClientError::SubResponse),
    }
}
