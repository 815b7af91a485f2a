//! Binary wire codec: the self-describing MessagePack envelope this
//! protocol is built on, plus typed decode/encode for every record kind
//! in the specification.
//!
//! Every server frame is a top-level array of maps (`rmpv::Value::Map`,
//! which preserves key order exactly as read off the wire). Because the
//! whole map decodes eagerly into an ordered `Vec<(Value, Value)>`, "`T`
//! must be the first key" is a single index check, and "skip unknown
//! fields" falls out for free: a field nobody reads is simply never
//! looked up in the vector.

use crate::error::ClientError;
use crate::schema::*;
use chrono::{DateTime, TimeZone, Utc};
use rmpv::Value;

/// One decoded server record, after tag dispatch.
pub enum Record {
    Welcome,
    Authenticated,
    Subscription(DesiredSub),
    ServerError { code: i64, msg: String },
    Trade(TradeMsg),
    Quote(QuoteMsg),
    Bar(BarMsg),
    Status(TradingStatusMsg),
    Imbalance(ImbalanceMsg),
    Luld(LuldMsg),
    CancelError(CancelErrorMsg),
    Correction(CorrectionMsg),
    Orderbook(OrderbookMsg),
    News(NewsMsg),
    Pricing(PricingMsg),
    /// An unrecognized `T` tag. The record was still fully decoded (and
    /// thus fully consumed); there's simply nowhere to route it.
    Unknown,
}

/// Decodes one raw inbound frame into its array of records.
pub fn decode_envelope(raw: &[u8]) -> Result<Vec<Value>, ClientError> {
    let mut cursor = std::io::Cursor::new(raw);
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| ClientError::FrameFormat(format!("invalid msgpack: {e}")))?;
    match value {
        Value::Array(records) => Ok(records),
        _ => Err(ClientError::FrameFormat("top-level frame is not an array".into())),
    }
}

/// Decodes one record (one element of the envelope array), dispatching
/// on its `T` tag.
pub fn decode_record(value: &Value) -> Result<Record, ClientError> {
    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(ClientError::FrameFormat("record is not a map".into())),
    };

    let (first_key, _) = entries
        .first()
        .ok_or_else(|| ClientError::FrameFormat("record map is empty".into()))?;
    if first_key.as_str() != Some("T") {
        return Err(ClientError::FrameFormat("first key in record is not T".into()));
    }

    let tag = get_str(entries, "T");
    Ok(match tag.as_str() {
        "success" => match get_str(entries, "msg").as_str() {
            "connected" => Record::Welcome,
            "authenticated" => Record::Authenticated,
            other => {
                return Err(ClientError::FrameFormat(format!(
                    "unexpected success message: {other}"
                )))
            }
        },
        "subscription" => Record::Subscription(decode_subscription(entries)),
        "error" => Record::ServerError {
            code: get_i64(entries, "code"),
            msg: get_str(entries, "msg"),
        },
        "t" => Record::Trade(TradeMsg {
            id: get_i64(entries, "i"),
            symbol: get_str(entries, "S"),
            exchange: get_str(entries, "x"),
            price: get_f64(entries, "p"),
            size: get_f64(entries, "s"),
            timestamp: get_timestamp(entries, "t"),
            conditions: get_vec_str(entries, "c"),
            tape: get_str(entries, "z"),
            trf_id: get_i64_opt(entries, "r"),
        }),
        "q" => Record::Quote(QuoteMsg {
            symbol: get_str(entries, "S"),
            bid_exchange: get_str(entries, "bx"),
            bid_price: get_f64(entries, "bp"),
            bid_size: get_f64(entries, "bs"),
            ask_exchange: get_str(entries, "ax"),
            ask_price: get_f64(entries, "ap"),
            ask_size: get_f64(entries, "as"),
            timestamp: get_timestamp(entries, "t"),
            conditions: get_vec_str(entries, "c"),
            tape: get_str(entries, "z"),
        }),
        "b" => Record::Bar(decode_bar(entries, BarKind::Bar)),
        "u" => Record::Bar(decode_bar(entries, BarKind::UpdatedBar)),
        "d" => Record::Bar(decode_bar(entries, BarKind::DailyBar)),
        "s" => Record::Status(TradingStatusMsg {
            symbol: get_str(entries, "S"),
            status_code: get_str(entries, "sc"),
            status_msg: get_str(entries, "sm"),
            reason_code: get_str(entries, "rc"),
            reason_msg: get_str(entries, "rm"),
            timestamp: get_timestamp(entries, "t"),
            tape: get_str(entries, "z"),
        }),
        "i" => Record::Imbalance(ImbalanceMsg {
            symbol: get_str(entries, "S"),
            price: get_f64(entries, "p"),
            timestamp: get_timestamp(entries, "t"),
            tape: get_str(entries, "z"),
        }),
        "l" => Record::Luld(LuldMsg {
            symbol: get_str(entries, "S"),
            limit_up: get_f64(entries, "u"),
            limit_down: get_f64(entries, "d"),
            indicator: get_str(entries, "i"),
            timestamp: get_timestamp(entries, "t"),
            tape: get_str(entries, "z"),
        }),
        "x" => Record::CancelError(CancelErrorMsg {
            symbol: get_str(entries, "S"),
            id: get_i64(entries, "i"),
            exchange: get_str(entries, "x"),
            price: get_f64(entries, "p"),
            size: get_f64(entries, "s"),
            cancel_action: get_str(entries, "a"),
            tape: get_str(entries, "z"),
            timestamp: get_timestamp(entries, "t"),
        }),
        "c" => Record::Correction(CorrectionMsg {
            symbol: get_str(entries, "S"),
            exchange: get_str(entries, "x"),
            original_id: get_i64(entries, "oi"),
            original_price: get_f64(entries, "op"),
            original_size: get_f64(entries, "os"),
            original_conditions: get_vec_str(entries, "oc"),
            corrected_id: get_i64(entries, "ci"),
            corrected_price: get_f64(entries, "cp"),
            corrected_size: get_f64(entries, "cs"),
            corrected_conditions: get_vec_str(entries, "cc"),
            tape: get_str(entries, "z"),
            timestamp: get_timestamp(entries, "t"),
        }),
        "o" => Record::Orderbook(OrderbookMsg {
            symbol: get_str(entries, "S"),
            exchange: get_str(entries, "x"),
            timestamp: get_timestamp(entries, "t"),
            bids: get_book_entries(entries, "b"),
            asks: get_book_entries(entries, "a"),
            reset: get_bool(entries, "r"),
        }),
        "n" => Record::News(NewsMsg {
            id: get_i64(entries, "id"),
            headline: get_str(entries, "headline"),
            summary: get_str(entries, "summary"),
            author: get_str(entries, "author"),
            content: get_str(entries, "content"),
            url: get_str(entries, "url"),
            created_at: get_timestamp(entries, "created_at"),
            updated_at: get_timestamp(entries, "updated_at"),
            symbols: get_vec_str(entries, "symbols"),
        }),
        "p" => Record::Pricing(PricingMsg {
            symbol: get_str(entries, "S"),
            exchange: get_str(entries, "x"),
            index_price: get_f64(entries, "ip"),
            mark_price: get_f64(entries, "mp"),
            funding_rate: get_f64(entries, "fr"),
            open_interest: get_f64(entries, "oi"),
            timestamp: get_timestamp(entries, "t"),
            funding_time: get_timestamp(entries, "ft"),
        }),
        _ => Record::Unknown,
    })
}

fn decode_bar(entries: &[(Value, Value)], kind: BarKind) -> BarMsg {
    BarMsg {
        kind,
        symbol: get_str(entries, "S"),
        open: get_f64(entries, "o"),
        high: get_f64(entries, "h"),
        low: get_f64(entries, "l"),
        close: get_f64(entries, "c"),
        volume: get_f64(entries, "v"),
        timestamp: get_timestamp(entries, "t"),
        trade_count: get_i64_opt(entries, "n"),
        vwap: get_f64_opt(entries, "vw"),
        exchange: get(entries, "x").and_then(|v| v.as_str()).map(str::to_string),
    }
}

fn decode_subscription(entries: &[(Value, Value)]) -> DesiredSub {
    let mut sub = DesiredSub::default();
    for kind in StreamKind::ALL {
        *sub.kind_mut(kind) = get_vec_str(entries, kind.wire_key()).into_iter().collect();
    }
    sub
}

fn get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v)
}

fn get_str(entries: &[(Value, Value)], key: &str) -> String {
    get(entries, key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn get_f64(entries: &[(Value, Value)], key: &str) -> f64 {
    get(entries, key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn get_f64_opt(entries: &[(Value, Value)], key: &str) -> Option<f64> {
    get(entries, key).and_then(|v| v.as_f64())
}

fn get_i64(entries: &[(Value, Value)], key: &str) -> i64 {
    get(entries, key).and_then(|v| v.as_i64()).unwrap_or(0)
}

fn get_i64_opt(entries: &[(Value, Value)], key: &str) -> Option<i64> {
    get(entries, key).and_then(|v| v.as_i64())
}

fn get_bool(entries: &[(Value, Value)], key: &str) -> bool {
    get(entries, key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn get_vec_str(entries: &[(Value, Value)], key: &str) -> Vec<String> {
    get(entries, key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn get_book_entries(entries: &[(Value, Value)], key: &str) -> Vec<BookEntry> {
    get(entries, key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|level| {
                    let level_entries = level.as_map()?;
                    Some(BookEntry {
                        price: get_f64(level_entries, "p"),
                        size: get_f64(level_entries, "s"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn get_timestamp(entries: &[(Value, Value)], key: &str) -> Option<DateTime<Utc>> {
    get(entries, key).and_then(decode_timestamp)
}

/// Decodes a MessagePack timestamp (ext type -1), an RFC3339 string, or a
/// plain millisecond integer, whichever the server actually sent.
fn decode_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Ext(-1, bytes) => decode_timestamp_ext(bytes),
        Value::String(s) => s
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Integer(_) => v.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn decode_timestamp_ext(bytes: &[u8]) -> Option<DateTime<Utc>> {
    match bytes.len() {
        4 => {
            let secs = u32::from_be_bytes(bytes.try_into().ok()?) as i64;
            DateTime::from_timestamp(secs, 0)
        }
        8 => {
            let packed = u64::from_be_bytes(bytes.try_into().ok()?);
            let nanos = (packed >> 34) as u32;
            let secs = (packed & 0x3_ffff_ffff) as i64;
            DateTime::from_timestamp(secs, nanos)
        }
        12 => {
            let nanos = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
            let secs = i64::from_be_bytes(bytes[4..12].try_into().ok()?);
            DateTime::from_timestamp(secs, nanos)
        }
        _ => None,
    }
}

pub(crate) fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).expect("encoding an in-memory rmpv::Value cannot fail");
    buf
}

/// Builds the `{action:"auth"|"access_token", key, secret}` frame.
pub fn build_auth_frame(key: &str, secret: &str, use_access_token: bool) -> Vec<u8> {
    let action = if use_access_token { "access_token" } else { "auth" };
    let entries = vec![
        (Value::from("action"), Value::from(action)),
        (Value::from("key"), Value::from(key)),
        (Value::from("secret"), Value::from(secret)),
    ];
    encode_value(&Value::Map(entries))
}

/// Builds a `{action:"subscribe"|"unsubscribe", trades, quotes, ...}`
/// frame. Only non-empty kinds are included, matching "omitted or empty"
/// in the wire spec. Used both for single-kind subscribe/unsubscribe
/// requests (a `DesiredSub` with only one non-empty field) and for the
/// full resubscribe sent during initialization.
pub fn build_action_frame(action: &str, sub: &DesiredSub) -> Vec<u8> {
    let mut entries = vec![(Value::from("action"), Value::from(action))];
    for kind in StreamKind::ALL {
        let set = sub.kind(kind);
        if !set.is_empty() {
            let arr: Vec<Value> = set.iter().cloned().map(Value::from).collect();
            entries.push((Value::from(kind.wire_key()), Value::Array(arr)));
        }
    }
    encode_value(&Value::Map(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_records(records: Vec<Value>) -> Vec<u8> {
        encode_value(&Value::Array(records))
    }

    fn map(pairs: Vec<(&str, Value)>) -> Value {
        Value::Map(pairs.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
    }

    #[test]
    fn decodes_welcome() {
        let raw = encode_records(vec![map(vec![("T", Value::from("success")), ("msg", Value::from("connected"))])]);
        let records = decode_envelope(&raw).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(decode_record(&records[0]).unwrap(), Record::Welcome));
    }

    #[test]
    fn rejects_record_with_t_not_first() {
        let raw = encode_records(vec![map(vec![("msg", Value::from("connected")), ("T", Value::from("success"))])]);
        let records = decode_envelope(&raw).unwrap();
        assert!(decode_record(&records[0]).is_err());
    }

    #[test]
    fn unknown_tag_is_skipped_not_errored() {
        let raw = encode_records(vec![map(vec![("T", Value::from("zzz")), ("whatever", Value::from(1))])]);
        let records = decode_envelope(&raw).unwrap();
        assert!(matches!(decode_record(&records[0]).unwrap(), Record::Unknown));
    }

    #[test]
    fn decodes_trade_with_unknown_extra_field() {
        let raw = encode_records(vec![map(vec![
            ("T", Value::from("t")),
            ("i", Value::from(123)),
            ("S", Value::from("ALPACA")),
            ("p", Value::from(10.5)),
            ("future_field_from_server", Value::from("ignore me")),
        ])]);
        let records = decode_envelope(&raw).unwrap();
        match decode_record(&records[0]).unwrap() {
            Record::Trade(t) => {
                assert_eq!(t.id, 123);
                assert_eq!(t.symbol, "ALPACA");
                assert_eq!(t.price, 10.5);
            }
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn decodes_subscription_echo() {
        let raw = encode_records(vec![map(vec![
            ("T", Value::from("subscription")),
            ("trades", Value::Array(vec![Value::from("AL"), Value::from("PACA")])),
        ])]);
        let records = decode_envelope(&raw).unwrap();
        match decode_record(&records[0]).unwrap() {
            Record::Subscription(sub) => {
                assert_eq!(sub.trades.len(), 2);
                assert!(sub.trades.contains("AL"));
                assert!(sub.quotes.is_empty());
            }
            _ => panic!("expected subscription"),
        }
    }

    #[test]
    fn action_frame_omits_empty_kinds() {
        let mut sub = DesiredSub::default();
        sub.trades.insert("ALPACA".to_string());
        let bytes = build_action_frame("subscribe", &sub);
        let decoded = rmpv::decode::read_value(&mut std::io::Cursor::new(&bytes)).unwrap();
        let entries = decoded.as_map().unwrap();
        assert!(get(entries, "trades").is_some());
        assert!(get(entries, "quotes").is_none());
    }
}
