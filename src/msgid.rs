//! `Message-ID` generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A new, globally unique RFC 5322 `msg-id`, angle brackets included.
///
/// Format: `<{unix-nanos}.{pid}.{counter}@{hostname}>`.
pub fn make_msg_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!(
        "<{nanos}.{pid}.{n}@{host}>",
        pid = std::process::id(),
        host = hostname()
    )
}

/// Host part for generated ids: `$HOSTNAME`, `/etc/hostname`, or `localhost`.
pub fn hostname() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| sanitize_host(&h))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

/// Keep only characters valid in a dot-atom domain.
fn sanitize_host(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shape() {
        let id = make_msg_id();
        assert!(id.starts_with('<') && id.ends_with('>'));
        let inner = &id[1..id.len() - 1];
        let (local, host) = inner.split_once('@').unwrap();
        assert_eq!(host, hostname());
        let fields: Vec<&str> = local.split('.').collect();
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|f| f.parse::<u64>().is_ok()));
        assert_eq!(fields[1], std::process::id().to_string());
    }

    #[test]
    fn test_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| make_msg_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host(" mail.example.com\n"), "mail.example.com");
        assert_eq!(sanitize_host("bad host<>"), "badhost");
    }
}
