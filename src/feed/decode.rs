// =============================================================================
// Feed frame decoding
// =============================================================================
//
// Inbound frames are JSON objects discriminated by a `type` field. Only
// `ticker` and `match` frames become events; every other discriminant
// (`subscriptions`, `heartbeat`, channels the exchange adds later) is
// skipped without error. A frame with a missing or mistyped required field
// is rejected with a `DecodeError` and the caller drops it.
// =============================================================================

use serde_json::Value;

use crate::errors::DecodeError;
use crate::timeutil::parse_feed_time;
use crate::types::{FeedEvent, Ticker, Trade, TradeSide};

/// Decode one raw feed frame into a typed event.
///
/// Returns `Ok(None)` for frames on channels we do not consume.
pub fn decode_frame(text: &str) -> Result<Option<FeedEvent>, DecodeError> {
    let root: Value = serde_json::from_str(text)?;

    match root.get("type").and_then(Value::as_str) {
        Some("ticker") => Ok(Some(FeedEvent::Ticker(decode_ticker(&root)?))),
        Some("match") => Ok(Some(FeedEvent::Trade(decode_match(&root)?))),
        _ => Ok(None),
    }
}

fn decode_ticker(root: &Value) -> Result<Ticker, DecodeError> {
    Ok(Ticker {
        symbol: field_str(root, "product_id")?.to_string(),
        best_bid: field_f64(root, "best_bid")?,
        best_ask: field_f64(root, "best_ask")?,
        last_price: field_f64(root, "price")?,
        volume_24h: field_f64(root, "volume_24h")?,
        time: parse_feed_time(field_str(root, "time")?)?,
    })
}

fn decode_match(root: &Value) -> Result<Trade, DecodeError> {
    let side_raw = field_str(root, "side")?;
    let side = TradeSide::parse(side_raw).ok_or_else(|| DecodeError::TypeMismatch {
        field: "side",
        detail: format!("expected buy or sell, got `{side_raw}`"),
    })?;

    Ok(Trade {
        symbol: field_str(root, "product_id")?.to_string(),
        price: field_f64(root, "price")?,
        size: field_f64(root, "size")?,
        side,
        time: parse_feed_time(field_str(root, "time")?)?,
        trade_id: field_i64(root, "trade_id")?,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn field_str<'a>(root: &'a Value, name: &'static str) -> Result<&'a str, DecodeError> {
    let val = root.get(name).ok_or(DecodeError::MissingField(name))?;
    val.as_str().ok_or_else(|| DecodeError::TypeMismatch {
        field: name,
        detail: format!("expected string, got {val}"),
    })
}

/// The feed serialises most numeric values as JSON strings; plain numbers
/// are accepted too.
fn field_f64(root: &Value, name: &'static str) -> Result<f64, DecodeError> {
    let val = root.get(name).ok_or(DecodeError::MissingField(name))?;
    match val {
        Value::String(s) => s.trim().parse().map_err(|_| DecodeError::TypeMismatch {
            field: name,
            detail: format!("`{s}` is not numeric"),
        }),
        Value::Number(n) => n.as_f64().ok_or_else(|| DecodeError::TypeMismatch {
            field: name,
            detail: format!("{n} does not fit an f64"),
        }),
        other => Err(DecodeError::TypeMismatch {
            field: name,
            detail: format!("expected number, got {other}"),
        }),
    }
}

fn field_i64(root: &Value, name: &'static str) -> Result<i64, DecodeError> {
    let val = root.get(name).ok_or(DecodeError::MissingField(name))?;
    match val {
        Value::String(s) => s.trim().parse().map_err(|_| DecodeError::TypeMismatch {
            field: name,
            detail: format!("`{s}` is not an integer"),
        }),
        Value::Number(n) => n.as_i64().ok_or_else(|| DecodeError::TypeMismatch {
            field: name,
            detail: format!("{n} does not fit an i64"),
        }),
        other => Err(DecodeError::TypeMismatch {
            field: name,
            detail: format!("expected integer, got {other}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
