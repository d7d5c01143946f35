use crate::event::ChannelName;

/// All failure modes surfaced by this crate.
///
/// Decode errors are recovered locally (the offending frame is dropped and a
/// `tracing::warn!` is emitted); everything else is either returned to the
/// caller directly or delivered through the subscription-error callback as
/// described in the crate docs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket closed without an explicit `disconnect()` call.
    #[error("transport closed unexpectedly")]
    TransportClosed,

    /// A private or presence channel was subscribed with `AuthStrategy::None`.
    #[error("channel `{0}` requires authentication but no auth strategy was configured")]
    AuthMissing(ChannelName),

    /// The auth HTTP request itself failed at the network layer.
    #[error("auth request for channel `{channel}` failed: {source}")]
    AuthTransport {
        channel: ChannelName,
        #[source]
        source: reqwest::Error,
    },

    /// The auth endpoint responded, but not with a usable auth payload.
    #[error("auth endpoint rejected channel `{channel}`: {detail}")]
    AuthResponse { channel: ChannelName, detail: String },

    /// An inbound frame was not valid JSON, or lacked the required `event` field.
    #[error("could not decode inbound frame: {0}")]
    ProtocolDecode(#[from] serde_json::Error),

    /// A `client-*` event was triggered on a channel that cannot currently accept it.
    #[error("client event `{event}` rejected on channel `{channel}`: {reason}")]
    InvalidClientEvent { channel: ChannelName, event: String, reason: &'static str },

    /// The reconnect attempt counter reached `max_reconnect_attempts`.
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(usize),

    /// The underlying WebSocket library returned an error.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection's background task has gone away; the `Client` handle is unusable.
    #[error("connection manager is no longer running")]
    ManagerGone,

    /// A URL passed to `Options` could not be parsed.
    #[error("invalid connection url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
