//! SSH failure sniffer (spec.md §4.2).
//!
//! Remote slaves run under `ssh`, and anything the client prints before
//! the slave binary even gets a chance to speak — password prompts,
//! refused connections, unknown hosts — shows up as ordinary lines on the
//! same channel. This module recognizes those lines so the supervisor can
//! distinguish "the slave is broken" from "the transport never got off
//! the ground".

/// Substrings that indicate the SSH transport itself failed rather than
/// the slave or its child. Matched case-insensitively against whole
/// lines, not just the split `key`.
const FAILURE_PATTERNS: &[&str] = &[
    "password:",
    "enter passphrase",
    "connection refused",
    "no route to host",
    "could not resolve hostname",
    "unknown host",
    "command not found",
    "host key verification failed",
    "ssh_exchange_identification",
];

/// Returns the matched pattern if `line` looks like an SSH transport
/// failure, so callers can build a message that names what was seen.
pub fn sniff(line: &str) -> Option<&'static str> {
    let lower = line.to_ascii_lowercase();
    FAILURE_PATTERNS
        .iter()
        .find(|pattern| lower.contains(*pattern))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_host_key_failure() {
        assert_eq!(
            sniff("Host key verification failed."),
            Some("host key verification failed")
        );
    }

    #[test]
    fn recognizes_password_prompt() {
        assert_eq!(sniff("user@host's password:"), Some("password:"));
    }

    #[test]
    fn ignores_ordinary_lines() {
        assert_eq!(sniff("state RUNNING"), None);
    }
}
