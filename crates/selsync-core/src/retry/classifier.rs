//! Failure classification for command and HTTP outcomes.

use crate::error::FailureKind;

const LOCK_PATTERNS: &[&str] = &[
    "index.lock",
    "cannot lock ref",
    "unable to lock",
    "another git process",
    "resource busy",
    "locked by",
    "is locked",
    "resource temporarily unavailable",
];

const NETWORK_PATTERNS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "early eof",
    "the remote end hung up unexpectedly",
    "network is unreachable",
    "temporary failure in name resolution",
    "http 502",
    "http 503",
    "http 504",
];

const TERMINAL_PATTERNS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "repository not found",
    "[rejected]",
    "non-fast-forward",
    "no such file or directory",
    "not a git repository",
    "does not appear to be a git repository",
];

/// Classify a failure by its message (typically command stderr).
///
/// Returns `None` when nothing matches; callers treat that as terminal.
pub fn classify_message(message: &str) -> Option<FailureKind> {
    let lower = message.to_ascii_lowercase();
    if LOCK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FailureKind::TransientLock);
    }
    if TERMINAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FailureKind::Terminal);
    }
    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FailureKind::TransientOther);
    }
    None
}

/// Classify an HTTP response status.
pub fn classify_http_status(status: u16) -> FailureKind {
    match status {
        409 | 423 => FailureKind::TransientLock,
        408 | 429 | 500..=599 => FailureKind::TransientOther,
        _ => FailureKind::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_lock_messages_are_lock_failures() {
        let stderr = "fatal: Unable to create '/repo/.git/index.lock': File exists.\n\
                      Another git process seems to be running in this repository";
        assert_eq!(classify_message(stderr), Some(FailureKind::TransientLock));
        assert_eq!(
            classify_message("error: cannot lock ref 'refs/heads/main'"),
            Some(FailureKind::TransientLock)
        );
    }

    #[test]
    fn network_messages_are_transient() {
        assert_eq!(
            classify_message("fatal: unable to access: Could not resolve host: example.com"),
            Some(FailureKind::TransientOther)
        );
    }

    #[test]
    fn credential_failures_are_terminal() {
        assert_eq!(
            classify_message("remote: Authentication failed for 'https://example.com/repo'"),
            Some(FailureKind::Terminal)
        );
        assert_eq!(
            classify_message(" ! [rejected]        main -> main (fetch first)"),
            Some(FailureKind::Terminal)
        );
    }

    #[test]
    fn unknown_messages_are_unclassified() {
        assert_eq!(classify_message("something odd happened"), None);
    }

    #[test]
    fn http_status_classes() {
        assert_eq!(classify_http_status(423), FailureKind::TransientLock);
        assert_eq!(classify_http_status(503), FailureKind::TransientOther);
        assert_eq!(classify_http_status(401), FailureKind::Terminal);
        assert_eq!(classify_http_status(400), FailureKind::Terminal);
    }
}
