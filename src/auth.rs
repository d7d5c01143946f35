//! Produces the auth token + channel-data for private/presence channels
//! (spec.md §4.2 "Authenticator").

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::{
    error::Error,
    event::{ChannelData, ChannelName, ChannelType},
    options::{AuthStrategy, Options},
};

/// Result of a successful authentication: the `auth` token, plus
/// `channel_data` for presence channels (spec.md §4.2/§4.4).
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub auth: String,
    pub channel_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    auth: String,
    #[serde(default)]
    channel_data: Option<String>,
}

/// Performs the configured [`AuthStrategy`] for `channel`, given the
/// current `socket_id`.
#[tracing::instrument(skip(http, options), fields(channel = %channel))]
pub async fn authenticate(
    options: &Options,
    http: &reqwest::Client,
    socket_id: &str,
    channel: &ChannelName,
) -> Result<AuthResult, Error> {
    match &options.auth_strategy {
        AuthStrategy::None => Err(Error::AuthMissing(channel.clone())),
        AuthStrategy::Endpoint { url } => {
            let resp = http
                .post(url)
                .header("content-type", "application/x-www-form-urlencoded")
                .form(&[("socket_id", socket_id), ("channel_name", channel.as_str())])
                .send()
                .await
                .map_err(|source| Error::AuthTransport { channel: channel.clone(), source })?;
            parse_endpoint_response(channel, resp).await
        }
        AuthStrategy::RequestBuilder(builder) => {
            let request = builder(socket_id, channel.as_str())
                .map_err(|source| Error::AuthTransport { channel: channel.clone(), source })?;
            let resp = http
                .execute(request)
                .await
                .map_err(|source| Error::AuthTransport { channel: channel.clone(), source })?;
            parse_endpoint_response(channel, resp).await
        }
        AuthStrategy::InlineSecret { app_key, secret } => {
            inline_secret_auth(options, app_key, secret, socket_id, channel)
        }
    }
}

async fn parse_endpoint_response(
    channel: &ChannelName,
    resp: reqwest::Response,
) -> Result<AuthResult, Error> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|source| Error::AuthTransport { channel: channel.clone(), source })?;

    if !status.is_success() {
        return Err(Error::AuthResponse {
            channel: channel.clone(),
            detail: format!("http {status}: {body}"),
        });
    }

    let parsed: EndpointResponse = serde_json::from_str(&body).map_err(|err| Error::AuthResponse {
        channel: channel.clone(),
        detail: format!("unparseable auth response: {err}"),
    })?;

    Ok(AuthResult { auth: parsed.auth, channel_data: parsed.channel_data })
}

fn inline_secret_auth(
    options: &Options,
    app_key: &str,
    secret: &str,
    socket_id: &str,
    channel: &ChannelName,
) -> Result<AuthResult, Error> {
    let channel_data = if channel.kind() == ChannelType::Presence {
        Some(presence_channel_data(options, socket_id))
    } else {
        None
    };

    let mut signing_string = format!("{socket_id}:{channel}");
    if let Some(data) = &channel_data {
        signing_string.push(':');
        signing_string.push_str(data);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(signing_string.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let auth = format!("{app_key}:{signature}").to_lowercase();

    Ok(AuthResult { auth, channel_data })
}

fn presence_channel_data(options: &Options, socket_id: &str) -> String {
    let data = match &options.user_data_provider {
        Some(provider) => provider.user_data(socket_id),
        None => ChannelData { user_id: socket_id.to_string(), user_info: None },
    };
    serde_json::to_string(&data).expect("ChannelData always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_secret_matches_worked_example() {
        // spec.md §8 scenario 3
        let options = Options::new("KEY").with_auth_strategy(AuthStrategy::InlineSecret {
            app_key: "KEY".to_string(),
            secret: "s3cret".to_string(),
        });
        let channel = ChannelName::new("presence-foo");
        let options = options.with_user_data_provider(|_socket_id: &str| ChannelData {
            user_id: "u1".to_string(),
            user_info: None,
        });

        let result = inline_secret_auth(&options, "KEY", "s3cret", "1.2", &channel).unwrap();
        assert_eq!(result.channel_data.as_deref(), Some("{\"user_id\":\"u1\"}"));

        let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
        mac.update(b"1.2:presence-foo:{\"user_id\":\"u1\"}");
        let expected_sig = hex::encode(mac.finalize().into_bytes());
        assert_eq!(result.auth, format!("key:{expected_sig}"));
    }

    #[tokio::test]
    async fn no_strategy_fails_with_auth_missing() {
        let options = Options::new("KEY");
        let channel = ChannelName::new("private-orders");
        let http = reqwest::Client::new();
        let err = authenticate(&options, &http, "abc", &channel).await.unwrap_err();
        assert!(matches!(err, Error::AuthMissing(_)));
    }
}
