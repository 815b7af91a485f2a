//! The pluggable feed handler: per-kind callbacks the caller registers.
//!
//! One callback slot per message kind, since a single connection carries
//! many kinds of typed messages. Handlers are stored behind a `RwLock`:
//! write on registration (subscribe/unsubscribe), read on dispatch, so
//! callbacks can be swapped at runtime without torn state.

use crate::schema::*;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// All per-kind callback slots. `None` means "no handler registered":
/// the dispatcher still routes and fully consumes the frame, it just has
/// nowhere to deliver it.
#[derive(Default)]
pub struct FeedHandlers {
    pub trades: Option<Callback<TradeMsg>>,
    pub quotes: Option<Callback<QuoteMsg>>,
    pub bars: Option<Callback<BarMsg>>,
    pub updated_bars: Option<Callback<BarMsg>>,
    pub daily_bars: Option<Callback<BarMsg>>,
    pub statuses: Option<Callback<TradingStatusMsg>>,
    pub imbalances: Option<Callback<ImbalanceMsg>>,
    pub lulds: Option<Callback<LuldMsg>>,
    pub cancel_errors: Option<Callback<CancelErrorMsg>>,
    pub corrections: Option<Callback<CorrectionMsg>>,
    pub orderbooks: Option<Callback<OrderbookMsg>>,
    pub news: Option<Callback<NewsMsg>>,
    pub pricing: Option<Callback<PricingMsg>>,
}

/// Shared, lockable handle to the registered handlers.
pub type SharedFeedHandlers = Arc<RwLock<FeedHandlers>>;

pub fn new_shared_handlers() -> SharedFeedHandlers {
    Arc::new(RwLock::new(FeedHandlers::default()))
}
