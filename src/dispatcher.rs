//! Routes one decoded record to its destination: the feed handler, the
//! subscription coordinator, the error handler, or nowhere (unknown tag,
//! silently discarded). Tag dispatch fans out across many message kinds
//! to independently-registered handler callbacks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::codec::{decode_envelope, decode_record, Record};
use crate::coordinator::SharedCoordinator;
use crate::feed::SharedFeedHandlers;
use crate::metrics::RuntimeMetrics;

/// Everything a processor needs to route a decoded record.
pub struct DispatchContext {
    pub handlers: SharedFeedHandlers,
    pub coordinator: SharedCoordinator,
    pub metrics: Arc<RuntimeMetrics>,
}

/// Decodes and dispatches every record in one raw inbound frame.
/// Decode errors are logged but never propagated: a single malformed
/// frame must not kill the processor (§4.6).
pub async fn dispatch_frame(raw: &[u8], ctx: &DispatchContext) {
    let records = match decode_envelope(raw) {
        Ok(records) => records,
        Err(e) => {
            log::warn!(target: "market_stream::dispatcher", "dropping malformed frame: {e}");
            ctx.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    for value in &records {
        match decode_record(value) {
            Ok(record) => dispatch_record(record, ctx).await,
            Err(e) => {
                log::warn!(target: "market_stream::dispatcher", "dropping malformed record: {e}");
                ctx.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn dispatch_record(record: Record, ctx: &DispatchContext) {
    ctx.metrics.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    match record {
        Record::Subscription(echoed) => ctx.coordinator.handle_subscription_frame(echoed).await,
        Record::ServerError { code, msg } => {
            log::warn!(target: "market_stream::dispatcher", "server error {code}: {msg}");
            ctx.coordinator.handle_error_frame(code, &msg).await;
        }
        Record::Welcome | Record::Authenticated => {
            // Only expected during initialization; if one arrives later
            // (a slow/duplicated server reply) there's simply nowhere to
            // route it.
        }
        Record::Trade(msg) => invoke(&ctx.handlers.read().await.trades, msg).await,
        Record::Quote(msg) => invoke(&ctx.handlers.read().await.quotes, msg).await,
        Record::Bar(msg) => {
            let handlers = ctx.handlers.read().await;
            let slot = match msg.kind {
                crate::schema::BarKind::Bar => &handlers.bars,
                crate::schema::BarKind::UpdatedBar => &handlers.updated_bars,
                crate::schema::BarKind::DailyBar => &handlers.daily_bars,
            };
            if let Some(cb) = slot {
                cb(msg);
            }
        }
        Record::Status(msg) => invoke(&ctx.handlers.read().await.statuses, msg).await,
        Record::Imbalance(msg) => invoke(&ctx.handlers.read().await.imbalances, msg).await,
        Record::Luld(msg) => invoke(&ctx.handlers.read().await.lulds, msg).await,
        Record::CancelError(msg) => invoke(&ctx.handlers.read().await.cancel_errors, msg).await,
        Record::Correction(msg) => invoke(&ctx.handlers.read().await.corrections, msg).await,
        Record::Orderbook(msg) => invoke(&ctx.handlers.read().await.orderbooks, msg).await,
        Record::News(msg) => invoke(&ctx.handlers.read().await.news, msg).await,
        Record::Pricing(msg) => invoke(&ctx.handlers.read().await.pricing, msg).await,
        Record::Unknown => {}
    }
}

async fn invoke<T>(slot: &Option<crate::feed::Callback<T>>, msg: T) {
    if let Some(cb) = slot {
        cb(msg);
    }
}
