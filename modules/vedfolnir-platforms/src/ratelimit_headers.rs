use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

use crate::types::RateLimitInfo;

/// Parses the `X-RateLimit-Limit` / `X-RateLimit-Remaining` /
/// `X-RateLimit-Reset` headers shared by Mastodon, Pleroma and Pixelfed
///. `X-RateLimit-Reset` is an RFC
/// 3339 timestamp on Mastodon-family instances.
pub fn parse_standard_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u32(headers, "x-ratelimit-limit")?;
    let remaining = header_u32(headers, "x-ratelimit-remaining")?;
    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_reset)?;

    Some(RateLimitInfo {
        limit,
        remaining,
        reset_at,
    })
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn parse_reset(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Some instances send a bare unix timestamp instead of RFC 3339.
    raw.parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    #[test]
    fn parses_rfc3339_reset() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from_static("300"));
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from_static("42"));
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from_static("2024-01-01T00:00:00Z"),
        );
        let info = parse_standard_headers(&headers).unwrap();
        assert_eq!(info.limit, 300);
        assert_eq!(info.remaining, 42);
    }

    #[test]
    fn missing_headers_yield_none() {
        assert!(parse_standard_headers(&HeaderMap::new()).is_none());
    }
}
