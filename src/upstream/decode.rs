//! Response decoding: retry-after extraction, buffered SSE parsing, and
//! thought-filtered text extraction.

use reqwest::header::HeaderMap;
use serde_json::Value;

use castor_schema::CloudCodeResponseBody;

/// Parse `<number><unit?>` where unit is `s` (default), `m` or `h`, into
/// milliseconds. Fractions are allowed (`"2.5s"` -> 2500).
pub fn parse_delay_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, unit) = match raw.char_indices().last() {
        Some((idx, c)) if matches!(c, 's' | 'm' | 'h') => (&raw[..idx], c),
        _ => (raw, 's'),
    };

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let multiplier = match unit {
        'h' => 3_600_000.0,
        'm' => 60_000.0,
        _ => 1_000.0,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier) as u64)
}

fn delay_from_detail(detail: &Value) -> Option<u64> {
    // google.rpc.RetryInfo carries `retryDelay`.
    if detail
        .get("@type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.contains("type.googleapis.com/google.rpc.RetryInfo"))
    {
        if let Some(delay) = detail
            .get("retryDelay")
            .and_then(Value::as_str)
            .and_then(parse_delay_ms)
        {
            return Some(delay);
        }
    }

    detail
        .get("metadata")
        .and_then(|m| m.get("quotaResetDelay"))
        .and_then(Value::as_str)
        .and_then(parse_delay_ms)
}

/// Retry-after in ms from a 429 body: `error.details[*]` entries carrying
/// either a `RetryInfo.retryDelay` or a `metadata.quotaResetDelay`.
pub fn retry_after_from_body(body: &Value) -> Option<u64> {
    body.get("error")?
        .get("details")?
        .as_array()?
        .iter()
        .find_map(delay_from_detail)
}

/// Retry-after in ms, resolved in order: `retry-after-ms` header,
/// `retry-after` header (integer seconds), then the body details.
pub fn parse_retry_after(headers: &HeaderMap, body: Option<&Value>) -> Option<u64> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(ms);
    }

    if let Some(secs) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(secs * 1000);
    }

    body.and_then(retry_after_from_body)
}

/// Parse a buffered SSE payload into its JSON events. Lines that are not
/// `data:` lines, the `[DONE]` terminator, and unparseable JSON are all
/// silently skipped.
pub fn collect_sse_events(text: &str) -> Vec<CloudCodeResponseBody> {
    text.lines()
        .filter_map(|line| {
            let data = line.trim().strip_prefix("data:")?.trim();
            if data.is_empty() || data == "[DONE]" {
                return None;
            }
            serde_json::from_str::<CloudCodeResponseBody>(data).ok()
        })
        .collect()
}

/// Concatenated model-visible text across a sequence of events.
pub fn extract_text(events: &[CloudCodeResponseBody]) -> String {
    events.iter().map(CloudCodeResponseBody::visible_text).collect()
}
