//! Keepalive sentinels.
//!
//! Pings and pongs are bare text frames outside the JSON envelope. They are
//! consumed by the transport and never reach the reconciliation engine.

use std::time::Duration;

/// Sent by the client after a period of inbound silence.
pub const PING: &str = "P";

/// Sent by the server in reply to [`PING`].
pub const PONG: &str = "p";

/// Inbound silence tolerated before the client pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Returns true if `frame` is a keepalive sentinel rather than a message.
pub fn is_keepalive(frame: &str) -> bool {
    frame == PING || frame == PONG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_not_json_messages() {
        assert!(is_keepalive("P"));
        assert!(is_keepalive("p"));
        assert!(!is_keepalive("{\"init\":{}}"));
        assert!(serde_json::from_str::<serde_json::Value>(PING).is_err());
    }
}
