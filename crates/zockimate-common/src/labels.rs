//! The label protocol: how a container opts into management and how
//! rollback intent is threaded across recreations.
//!
//! `enable` and `zfs_dataset` are read-only inputs set by the operator.
//! `original_image` and `snapshot_id` are written by the update/rollback
//! paths and must not be read anywhere else.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Opts a container into management when set to `"true"`.
pub const ENABLE: &str = "zockimate.enable";
/// Names the ZFS dataset backing the container's data volume.
pub const ZFS_DATASET: &str = "zockimate.zfs_dataset";
/// Overrides the readiness wait, Go duration syntax (`90s`, `5m`, `1h`).
pub const TIMEOUT: &str = "zockimate.timeout";
/// Preserves the operator's intended image reference across rollbacks.
pub const ORIGINAL_IMAGE: &str = "zockimate.original_image";
/// Marks that the container currently runs a rolled-back state.
pub const SNAPSHOT_ID: &str = "zockimate.snapshot_id";

/// Readiness-timeout overrides outside [30s, 24h] are ignored.
pub const MIN_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_READY_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub fn is_enabled(labels: &HashMap<String, String>) -> bool {
    labels.get(ENABLE).map(String::as_str) == Some("true")
}

pub fn zfs_dataset(labels: &HashMap<String, String>) -> Option<&str> {
    labels.get(ZFS_DATASET).map(String::as_str).filter(|d| !d.is_empty())
}

/// Effective readiness timeout: the container's `zockimate.timeout` label if
/// it parses and falls within [30s, 24h], else the supplied default.
pub fn ready_timeout(labels: &HashMap<String, String>, default: Duration) -> Duration {
    let Some(raw) = labels.get(TIMEOUT) else {
        return default;
    };
    match parse_go_duration(raw) {
        Some(d) if d >= MIN_READY_TIMEOUT && d <= MAX_READY_TIMEOUT => d,
        Some(_) => {
            warn!(timeout = %raw, "timeout label out of range, using default");
            default
        }
        None => {
            warn!(timeout = %raw, "failed to parse timeout label, using default");
            default
        }
    }
}

/// Parses Go-style durations: one or more `<number><unit>` components with
/// units `ns`, `us`, `ms`, `s`, `m`, `h`, e.g. `90s`, `1h30m`, `1.5h`.
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let s = input.trim().strip_prefix('+').unwrap_or(input.trim());
    if s.is_empty() || s.starts_with('-') {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_len);
        let value: f64 = num.parse().ok()?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "\u{00b5}s" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        total += Duration::from_nanos((value * nanos_per_unit) as u64);
        rest = tail;
    }
    Some(total)
}

/// Parses the timestamp formats the store has historically produced:
/// `YYYY-MM-DD HH:MM:SS`, RFC 3339, and RFC 3339 with fractional seconds.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Date-only inputs from the CLI (`--since 2024-01-01`).
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

/// Strips the leading path separator the engine prepends to container names.
pub fn clean_container_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// Short form of an engine id (first 12 characters).
pub fn shorten_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(timeout: &str) -> HashMap<String, String> {
        HashMap::from([(TIMEOUT.to_string(), timeout.to_string())])
    }

    #[test]
    fn parses_simple_and_compound_durations() {
        assert_eq!(parse_go_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_go_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_go_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_go_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_go_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_go_duration("oops"), None);
        assert_eq!(parse_go_duration("90"), None);
        assert_eq!(parse_go_duration("-30s"), None);
    }

    #[test]
    fn timeout_label_honored_only_inside_window() {
        let default = Duration::from_secs(1800);

        assert_eq!(ready_timeout(&labels("29s"), default), default);
        assert_eq!(
            ready_timeout(&labels("30s"), default),
            Duration::from_secs(30)
        );
        assert_eq!(
            ready_timeout(&labels("24h"), default),
            Duration::from_secs(86_400)
        );
        assert_eq!(ready_timeout(&labels("24h1s"), default), default);
        assert_eq!(ready_timeout(&labels("soon"), default), default);
        assert_eq!(ready_timeout(&HashMap::new(), default), default);
    }

    #[test]
    fn accepts_the_three_store_timestamp_formats() {
        for raw in [
            "2024-06-01 12:30:45",
            "2024-06-01T12:30:45Z",
            "2024-06-01T12:30:45.123456789Z",
        ] {
            let parsed = parse_time(raw).expect(raw);
            assert_eq!(parsed.timestamp(), 1_717_245_045, "{raw}");
        }
        assert!(parse_time("not a time").is_none());
    }

    #[test]
    fn name_and_id_helpers() {
        assert_eq!(clean_container_name("/web"), "web");
        assert_eq!(clean_container_name("web"), "web");
        assert_eq!(shorten_id("sha256:0123456789abcdef"), "sha256:01234");
        assert_eq!(shorten_id("short"), "short");
    }

    #[test]
    fn enablement_requires_the_exact_true_value() {
        let mut l = HashMap::from([(ENABLE.to_string(), "true".to_string())]);
        assert!(is_enabled(&l));
        l.insert(ENABLE.to_string(), "1".to_string());
        assert!(!is_enabled(&l));
        assert!(!is_enabled(&HashMap::new()));
    }
}
