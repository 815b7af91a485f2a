//! Typed error taxonomy for the streaming client.
//!
//! Mirrors the structural error families a caller needs to branch on:
//! connection-lifecycle errors, subscription-change errors, and the
//! server-reported codes from `{T:"error", code, msg}` frames.
//!
//! Transport-level I/O failures are carried as plain strings rather than
//! wrapping the injected transport's own error type directly: the
//! `Transport` trait is generic over any backend, so there is no single
//! concrete error type to attach as a `#[source]`.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("connect called more than once on this client")]
    ConnectCalledMultipleTimes,

    #[error("did not receive connected message")]
    NotConnected,

    #[error("did not receive authenticated message")]
    BadAuthResponse,

    #[error("unexpected response to subscription request")]
    SubResponse,

    #[error("subscription change requested before connect")]
    SubscriptionChangeBeforeConnect,

    #[error("subscription change requested after client terminated")]
    SubscriptionChangeAfterTerminated,

    #[error("a subscription change is already in progress")]
    SubscriptionChangeAlreadyInProgress,

    #[error("subscription change was interrupted by disconnect")]
    SubscriptionChangeInterrupted,

    #[error("subscription change timed out waiting for server response")]
    SubscriptionChangeTimeout,

    #[error("subscription change is not valid for this feed")]
    SubscriptionChangeInvalidForFeed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("symbol limit exceeded")]
    SymbolLimitExceeded,

    #[error("connection limit exceeded")]
    ConnectionLimitExceeded,

    #[error("slow client")]
    SlowClient,

    #[error("insufficient subscription")]
    InsufficientSubscription,

    #[error("insufficient scope")]
    InsufficientScope,

    #[error("server error {code}: {msg}")]
    ServerError { code: i64, msg: String },

    #[error("malformed frame: {0}")]
    FrameFormat(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cancelled before connection could be established: {0}")]
    CancelledBeforeConnect(String),

    #[error("max reconnect limit reached: {0}")]
    MaxReconnectsReached(String),

    #[error("irrecoverable error: {0}")]
    Irrecoverable(Box<ClientError>),
}

impl ClientError {
    /// Maps a server `{T:"error", code, msg}` frame to a typed error.
    ///
    /// Unknown codes fall back to `ServerError`, carrying the raw code/msg
    /// through so callers can still log something useful.
    pub fn from_server_code(code: i64, msg: &str) -> Self {
        match code {
            402 => ClientError::InvalidCredentials,
            405 => ClientError::SymbolLimitExceeded,
            406 => ClientError::ConnectionLimitExceeded,
            407 => ClientError::SlowClient,
            409 => ClientError::InsufficientSubscription,
            410 => ClientError::SubscriptionChangeInvalidForFeed,
            411 => ClientError::InsufficientScope,
            other => ClientError::ServerError {
                code: other,
                msg: msg.to_string(),
            },
        }
    }

    /// Whether this error should terminate the client rather than trigger
    /// another reconnect attempt.
    pub fn is_irrecoverable(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidCredentials
                | ClientError::InsufficientSubscription
                | ClientError::InsufficientScope
                | ClientError::Irrecoverable(_)
        )
    }

    /// Wraps this error as irrecoverable, unless it already is one.
    pub fn into_irrecoverable(self) -> Self {
        if matches!(self, ClientError::Irrecoverable(_)) {
            self
        } else {
            ClientError::Irrecoverable(Box::new(self))
        }
    }

    /// True for the one error retriable inside the auth-retry loop.
    pub fn is_retriable_auth_error(&self) -> bool {
        matches!(self, ClientError::ConnectionLimitExceeded)
    }
}

/// Returns true when a dial failure matches the irrecoverable
/// "HTTP 4xx during handshake" pattern (a non-101 status in the WebSocket
/// upgrade response). Transport implementations that don't surface a
/// tungstenite error can still trigger this by including the literal
/// phrase in their error message.
pub fn is_irrecoverable_dial_error(err: &anyhow::Error) -> bool {
    if let Some(tung_err) = err.downcast_ref::<tokio_tungstenite::tungstenite::Error>() {
        if let tokio_tungstenite::tungstenite::Error::Http(resp) = tung_err {
            let status = resp.status().as_u16();
            return (400..500).contains(&status);
        }
    }
    let msg = err.to_string();
    msg.contains("expected handshake response status code 101") && msg.contains("4")
}
