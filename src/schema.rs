//! Wire-level data kinds and the durable subscription set.
//!
//! Every server data frame decodes into one of these structs, keyed by its
//! `T` tag (see the dispatcher). Fields follow the table in the
//! specification; unknown fields present on the wire are simply never
//! read out of the decoded `rmpv::Value::Map`, which is what gives the
//! decoder its forward-compatibility for free.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A single price/size level in an orderbook update.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeMsg {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub price: f64,
    pub size: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub conditions: Vec<String>,
    pub tape: String,
    pub trf_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteMsg {
    pub symbol: String,
    pub bid_exchange: String,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_exchange: String,
    pub ask_price: f64,
    pub ask_size: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub conditions: Vec<String>,
    pub tape: String,
}

/// Bar kind: plain bar (`b`), updated bar (`u`), or daily bar (`d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    Bar,
    UpdatedBar,
    DailyBar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarMsg {
    pub kind: BarKind,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub trade_count: Option<i64>,
    pub vwap: Option<f64>,
    /// Crypto bars carry an originating exchange; stock bars don't.
    pub exchange: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingStatusMsg {
    pub symbol: String,
    pub status_code: String,
    pub status_msg: String,
    pub reason_code: String,
    pub reason_msg: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub tape: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceMsg {
    pub symbol: String,
    pub price: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub tape: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LuldMsg {
    pub symbol: String,
    pub limit_up: f64,
    pub limit_down: f64,
    pub indicator: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub tape: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelErrorMsg {
    pub symbol: String,
    pub id: i64,
    pub exchange: String,
    pub price: f64,
    pub size: f64,
    pub cancel_action: String,
    pub tape: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionMsg {
    pub symbol: String,
    pub exchange: String,
    pub original_id: i64,
    pub original_price: f64,
    pub original_size: f64,
    pub original_conditions: Vec<String>,
    pub corrected_id: i64,
    pub corrected_price: f64,
    pub corrected_size: f64,
    pub corrected_conditions: Vec<String>,
    pub tape: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderbookMsg {
    pub symbol: String,
    pub exchange: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsMsg {
    pub id: i64,
    pub headline: String,
    pub summary: String,
    pub author: String,
    pub content: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingMsg {
    pub symbol: String,
    pub exchange: String,
    pub index_price: f64,
    pub mark_price: f64,
    pub funding_rate: f64,
    pub open_interest: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub funding_time: Option<DateTime<Utc>>,
}

/// The kinds a caller can subscribe/unsubscribe to by symbol. Cancel-error
/// and correction streams are deliberately absent here: the server pushes
/// them automatically once a handler is registered, and they never appear
/// in a client-sent subscribe/unsubscribe frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Trades,
    Quotes,
    Bars,
    UpdatedBars,
    DailyBars,
    Statuses,
    Imbalances,
    Lulds,
    Orderbooks,
    News,
    Pricing,
}

impl StreamKind {
    pub const ALL: [StreamKind; 11] = [
        StreamKind::Trades,
        StreamKind::Quotes,
        StreamKind::Bars,
        StreamKind::UpdatedBars,
        StreamKind::DailyBars,
        StreamKind::Statuses,
        StreamKind::Imbalances,
        StreamKind::Lulds,
        StreamKind::Orderbooks,
        StreamKind::News,
        StreamKind::Pricing,
    ];

    /// The key used for this kind in subscribe/unsubscribe/subscription wire frames.
    pub fn wire_key(self) -> &'static str {
        match self {
            StreamKind::Trades => "trades",
            StreamKind::Quotes => "quotes",
            StreamKind::Bars => "bars",
            StreamKind::UpdatedBars => "updatedBars",
            StreamKind::DailyBars => "dailyBars",
            StreamKind::Statuses => "statuses",
            StreamKind::Imbalances => "imbalances",
            StreamKind::Lulds => "lulds",
            StreamKind::Orderbooks => "orderbooks",
            StreamKind::News => "news",
            StreamKind::Pricing => "pricing",
        }
    }
}

/// The authoritative, server-echoed subscription set. Only the dispatcher,
/// acting on a `{T:"subscription", ...}` frame, may mutate this, never an
/// optimistic update at submit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSub {
    pub trades: HashSet<String>,
    pub quotes: HashSet<String>,
    pub bars: HashSet<String>,
    pub updated_bars: HashSet<String>,
    pub daily_bars: HashSet<String>,
    pub statuses: HashSet<String>,
    pub imbalances: HashSet<String>,
    pub lulds: HashSet<String>,
    pub orderbooks: HashSet<String>,
    pub news: HashSet<String>,
    pub pricing: HashSet<String>,
}

impl DesiredSub {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
            && self.quotes.is_empty()
            && self.bars.is_empty()
            && self.updated_bars.is_empty()
            && self.daily_bars.is_empty()
            && self.statuses.is_empty()
            && self.imbalances.is_empty()
            && self.lulds.is_empty()
            && self.orderbooks.is_empty()
            && self.news.is_empty()
            && self.pricing.is_empty()
    }

    pub fn kind(&self, kind: StreamKind) -> &HashSet<String> {
        match kind {
            StreamKind::Trades => &self.trades,
            StreamKind::Quotes => &self.quotes,
            StreamKind::Bars => &self.bars,
            StreamKind::UpdatedBars => &self.updated_bars,
            StreamKind::DailyBars => &self.daily_bars,
            StreamKind::Statuses => &self.statuses,
            StreamKind::Imbalances => &self.imbalances,
            StreamKind::Lulds => &self.lulds,
            StreamKind::Orderbooks => &self.orderbooks,
            StreamKind::News => &self.news,
            StreamKind::Pricing => &self.pricing,
        }
    }

    pub fn kind_mut(&mut self, kind: StreamKind) -> &mut HashSet<String> {
        match kind {
            StreamKind::Trades => &mut self.trades,
            StreamKind::Quotes => &mut self.quotes,
            StreamKind::Bars => &mut self.bars,
            StreamKind::UpdatedBars => &mut self.updated_bars,
            StreamKind::DailyBars => &mut self.daily_bars,
            StreamKind::Statuses => &mut self.statuses,
            StreamKind::Imbalances => &mut self.imbalances,
            StreamKind::Lulds => &mut self.lulds,
            StreamKind::Orderbooks => &mut self.orderbooks,
            StreamKind::News => &mut self.news,
            StreamKind::Pricing => &mut self.pricing,
        }
    }

}
