use std::time::{Duration, SystemTime};

use crate::caching::CacheRecord;
use crate::status::Status;

/// Where a cached record stands relative to its time to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than half its time to live. Served without any network call.
    Fresh,
    /// In the second half of its time to live. Served, while a refresh is started.
    Refresh,
    /// Past its time to live.
    Expired,
}

/// Extracts `max-age` from a `Cache-Control` header value.
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        let seconds = value.trim().trim_matches('"').parse::<u64>().ok()?;
        Some(Duration::from_secs(seconds))
    })
}

/// The time to live of `record`.
///
/// Error responses live for `error_ttl`. Everything else lives for `min_ttl`, or longer if
/// the server declared a longer `max-age`.
pub fn effective_ttl(record: &CacheRecord, min_ttl: Duration, error_ttl: Duration) -> Duration {
    if Status::find(record.status).is_error() {
        return error_ttl;
    }
    let max_age = record
        .cache_control
        .as_deref()
        .and_then(parse_max_age)
        .unwrap_or_default();
    min_ttl.max(max_age)
}

/// Classifies a record written at `last_modified` with the given `ttl` at time `now`.
///
/// A `ttl` that reaches past the end of representable time never expires.
pub fn classify(last_modified: SystemTime, ttl: Duration, now: SystemTime) -> Freshness {
    let Some(expiry) = last_modified.checked_add(ttl) else {
        return Freshness::Fresh;
    };
    let Some(refresh_at) = last_modified.checked_add(ttl - ttl / 2) else {
        return Freshness::Fresh;
    };
    if now < refresh_at {
        Freshness::Fresh
    } else if now < expiry {
        Freshness::Refresh
    } else {
        Freshness::Expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16, cache_control: Option<&str>) -> CacheRecord {
        CacheRecord {
            file_list: vec!["a.body".into()],
            results_sha1: String::new(),
            status,
            mime_type: None,
            cache_control: cache_control.map(String::from),
            location: None,
            last_modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(
            parse_max_age("public, max-age=3600"),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            parse_max_age("s-maxage=10, Max-Age = 60"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=soon"), None);
    }

    #[test]
    fn test_server_max_age_wins() {
        let record = record(200, Some("max-age=3600"));
        let ttl = effective_ttl(&record, Duration::from_secs(10), Duration::ZERO);
        assert_eq!(ttl, Duration::from_secs(3600));

        let record = self::record(200, Some("max-age=5"));
        let ttl = effective_ttl(&record, Duration::from_secs(10), Duration::ZERO);
        assert_eq!(ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_error_ttl() {
        let record = record(500, Some("max-age=3600"));
        let ttl = effective_ttl(&record, Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(ttl, Duration::from_secs(2));
    }

    #[test]
    fn test_classify() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let d = Duration::from_secs(100);

        assert_eq!(classify(t0, d, t0 + d / 4), Freshness::Fresh);
        assert_eq!(classify(t0, d, t0 + d / 2), Freshness::Refresh);
        assert_eq!(classify(t0, d * 3 / 4, t0 + d / 2), Freshness::Refresh);
        assert_eq!(classify(t0, d, t0 + d * 3 / 4), Freshness::Refresh);
        assert_eq!(classify(t0, d, t0 + d), Freshness::Expired);
        assert_eq!(classify(t0, d, t0 + d * 3 / 2), Freshness::Expired);
        assert_eq!(classify(t0, Duration::ZERO, t0), Freshness::Expired);
    }

    #[test]
    fn test_classify_unbounded_ttl() {
        let t0 = SystemTime::now();
        let ttl = parse_max_age("max-age=18446744073709551615").unwrap();

        assert_eq!(classify(t0, ttl, t0), Freshness::Fresh);
        assert_eq!(classify(t0, Duration::MAX, t0), Freshness::Fresh);
        assert_eq!(
            classify(t0, Duration::MAX, t0 + Duration::from_secs(86400 * 365)),
            Freshness::Fresh
        );
    }
}
