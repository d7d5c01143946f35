use std::fmt;

/// spec.md §3 "ConnectionState" — a finite set with transitions notified to
/// an observer as `(old, new)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
    ReconnectingWhenNetworkBecomesReachable,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ReconnectingWhenNetworkBecomesReachable => {
                "reconnecting_when_network_becomes_reachable"
            }
        };
        f.write_str(s)
    }
}

/// The wait before attempt `n` (zero-based, reset on success) is `n^2`
/// seconds, capped by `max_gap_seconds` when set (spec.md §4.1 "Backoff").
pub fn backoff_seconds(attempt: usize, max_gap_seconds: Option<u64>) -> u64 {
    let squared = (attempt as u64).saturating_mul(attempt as u64);
    match max_gap_seconds {
        Some(cap) => squared.min(cap),
        None => squared,
    }
}

/// The protocol's "normal closure" close code; a close with this code never
/// triggers a reconnect (spec.md §4.1).
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_n_squared() {
        assert_eq!(backoff_seconds(0, None), 0);
        assert_eq!(backoff_seconds(1, None), 1);
        assert_eq!(backoff_seconds(2, None), 4);
        assert_eq!(backoff_seconds(3, None), 9);
    }

    #[test]
    fn backoff_respects_cap() {
        assert_eq!(backoff_seconds(4, Some(10)), 10);
        assert_eq!(backoff_seconds(3, Some(10)), 9);
    }
}
