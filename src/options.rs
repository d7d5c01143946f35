//! Immutable connection configuration (spec.md §3 "Options").

use std::{fmt, sync::Arc};

use url::Url;

use crate::event::ChannelData;

/// Identifies this crate on the wire, `?client=<lib_name>&version=<lib_version>`
/// (spec.md §6).
pub const LIB_NAME: &str = "pulse-client-rs";
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: u8 = 7;

/// A fully-formed HTTP request for the `RequestBuilder` auth strategy
/// (spec.md §4.2). The closure receives the socket id and channel name and
/// must return a request ready to execute; response parsing afterwards is
/// identical to the `Endpoint` strategy.
pub type AuthRequestBuilder =
    Arc<dyn Fn(&str, &str) -> Result<reqwest::Request, reqwest::Error> + Send + Sync>;

/// Supplies `{ user_id, user_info? }` for presence channels (spec.md §4.2
/// "User-data for presence"). Absent a provider, `user_id` defaults to the
/// current socket id.
pub trait UserDataProvider: Send + Sync {
    fn user_data(&self, socket_id: &str) -> ChannelData;
}

impl<F> UserDataProvider for F
where
    F: Fn(&str) -> ChannelData + Send + Sync,
{
    fn user_data(&self, socket_id: &str) -> ChannelData {
        (self)(socket_id)
    }
}

/// The four ways a restricted subscription can be authenticated
/// (spec.md §4.2).
#[derive(Clone)]
pub enum AuthStrategy {
    /// Private/presence subscriptions fail with `Error::AuthMissing`.
    None,
    /// POSTs `socket_id=<id>&channel_name=<name>` to `url`.
    Endpoint { url: String },
    /// Delegates request construction to a user-supplied closure.
    RequestBuilder(AuthRequestBuilder),
    /// Computes `HMAC-SHA256(secret, "socket_id:channel_name[:channel_data]")`
    /// in-process; no network round-trip.
    InlineSecret { app_key: String, secret: String },
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::None => f.write_str("AuthStrategy::None"),
            AuthStrategy::Endpoint { url } => {
                f.debug_struct("AuthStrategy::Endpoint").field("url", url).finish()
            }
            AuthStrategy::RequestBuilder(_) => f.write_str("AuthStrategy::RequestBuilder(..)"),
            AuthStrategy::InlineSecret { app_key, .. } => f
                .debug_struct("AuthStrategy::InlineSecret")
                .field("app_key", app_key)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Immutable connection configuration (spec.md §3).
///
/// Construct via [`Options::new`] then the builder-style `with_*` methods,
/// the same way the teacher builds [`ConnectionDetails`] incrementally
/// before a connect call.
#[derive(Clone)]
pub struct Options {
    pub app_key: String,
    pub host: String,
    pub port: u16,
    pub encrypted: bool,
    pub auth_strategy: AuthStrategy,
    pub auto_reconnect: bool,
    pub attempt_to_return_json_object: bool,
    pub max_reconnect_attempts: Option<usize>,
    pub max_reconnect_gap_seconds: Option<u64>,
    pub(crate) user_data_provider: Option<Arc<dyn UserDataProvider>>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("app_key", &self.app_key)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encrypted", &self.encrypted)
            .field("auth_strategy", &self.auth_strategy)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("attempt_to_return_json_object", &self.attempt_to_return_json_object)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("max_reconnect_gap_seconds", &self.max_reconnect_gap_seconds)
            .field("user_data_provider", &self.user_data_provider.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Options {
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            host: "ws.example.com".to_string(),
            port: 443,
            encrypted: true,
            auth_strategy: AuthStrategy::None,
            auto_reconnect: true,
            attempt_to_return_json_object: true,
            max_reconnect_attempts: None,
            max_reconnect_gap_seconds: Some(30),
            user_data_provider: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16, encrypted: bool) -> Self {
        self.host = host.into();
        self.port = port;
        self.encrypted = encrypted;
        self
    }

    pub fn with_auth_strategy(mut self, strategy: AuthStrategy) -> Self {
        self.auth_strategy = strategy;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_attempt_to_return_json_object(mut self, attempt: bool) -> Self {
        self.attempt_to_return_json_object = attempt;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, max: Option<usize>) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    pub fn with_max_reconnect_gap_seconds(mut self, max: Option<u64>) -> Self {
        self.max_reconnect_gap_seconds = max;
        self
    }

    pub fn with_user_data_provider(mut self, provider: impl UserDataProvider + 'static) -> Self {
        self.user_data_provider = Some(Arc::new(provider));
        self
    }

    /// Builds `[wss|ws]://<host>:<port>/app/<app_key>?protocol=7&client=...&version=...`
    /// (spec.md §6).
    pub fn socket_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.encrypted { "wss" } else { "ws" };
        let raw = format!(
            "{scheme}://{host}:{port}/app/{app_key}?protocol={protocol}&client={client}&version={version}",
            scheme = scheme,
            host = self.host,
            port = self.port,
            app_key = self.app_key,
            protocol = PROTOCOL_VERSION,
            client = LIB_NAME,
            version = LIB_VERSION,
        );
        Url::parse(&raw)
    }

    /// The backoff cap in seconds, if one was set (spec.md §4.1 "Backoff").
    pub fn reconnect_gap_cap(&self) -> Option<u64> {
        self.max_reconnect_gap_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_has_expected_shape() {
        let opts = Options::new("KEY").with_host("ws.example.com", 443, true);
        let url = opts.socket_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/app/KEY");
        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(query.get("protocol").unwrap(), "7");
        assert_eq!(query.get("client").unwrap(), LIB_NAME);
    }

    #[test]
    fn unencrypted_uses_ws_scheme() {
        let opts = Options::new("KEY").with_host("localhost", 8080, false);
        assert_eq!(opts.socket_url().unwrap().scheme(), "ws");
    }
}
