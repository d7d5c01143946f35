//! Native-push device-registration gateway: a small retrying HTTP outbox,
//! independent of the WebSocket connection (spec.md §6 "Native push gateway").
//!
//! This is an external collaborator, not part of the core connection
//! subsystem — registration, interest changes, and retries all happen over
//! plain HTTP and never touch [`crate::connection`] state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A fixed retry ceiling gates further attempts on a failing outbox head
/// (spec.md §6, §9 "Outbox").
const RETRY_CEILING: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Subscribe,
    Unsubscribe,
}

impl Change {
    fn method(self) -> reqwest::Method {
        match self {
            Change::Subscribe => reqwest::Method::POST,
            Change::Unsubscribe => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone)]
struct OutboxItem {
    interest: String,
    change: Change,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    app_key: &'a str,
    platform_type: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: String,
}

#[derive(Serialize)]
struct InterestRequest<'a> {
    app_key: &'a str,
}

/// Registers a device with the gateway and maintains its interest set.
///
/// Interest changes made before the client id is known, or while the outbox
/// is paused after exhausting [`RETRY_CEILING`], queue in order; there is
/// deliberately no deduplication, so a rapid subscribe/unsubscribe pair for
/// the same interest sends both requests (spec.md §9 "Outbox").
pub struct PushClient {
    http: reqwest::Client,
    base_url: String,
    app_key: String,
    client_id: Option<String>,
    outbox: VecDeque<OutboxItem>,
    consecutive_failures: u32,
    paused: bool,
}

impl PushClient {
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            app_key: app_key.into(),
            client_id: None,
            outbox: VecDeque::new(),
            consecutive_failures: 0,
            paused: false,
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// `POST /client_api/v1/clients` with `{app_key, platform_type, token}`;
    /// stores the returned `id` for subsequent interest calls.
    #[tracing::instrument(skip(self, token))]
    pub async fn register(&mut self, platform_type: &str, token: &str) -> Result<(), Error> {
        let url = format!("{}/client_api/v1/clients", self.base_url);
        let body = RegisterRequest { app_key: &self.app_key, platform_type, token };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| Error::AuthTransport {
                channel: crate::event::ChannelName::new("push-registration"),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(Error::AuthResponse {
                channel: crate::event::ChannelName::new("push-registration"),
                detail: format!("registration rejected with status {}", resp.status()),
            });
        }

        let parsed: RegisterResponse =
            resp.json().await.map_err(|source| Error::AuthTransport {
                channel: crate::event::ChannelName::new("push-registration"),
                source,
            })?;
        self.client_id = Some(parsed.id);
        self.flush().await;
        Ok(())
    }

    /// Queues an interest subscribe; sent immediately if the client id is
    /// already known and the outbox isn't paused.
    pub async fn subscribe_interest(&mut self, interest: impl Into<String>) {
        self.outbox.push_back(OutboxItem { interest: interest.into(), change: Change::Subscribe });
        self.flush().await;
    }

    pub async fn unsubscribe_interest(&mut self, interest: impl Into<String>) {
        self.outbox.push_back(OutboxItem { interest: interest.into(), change: Change::Unsubscribe });
        self.flush().await;
    }

    /// Resumes a paused outbox, resetting the failure counter.
    pub async fn resume(&mut self) {
        self.paused = false;
        self.consecutive_failures = 0;
        self.flush().await;
    }

    async fn flush(&mut self) {
        let Some(client_id) = self.client_id.clone() else { return };
        if self.paused {
            return;
        }

        while let Some(item) = self.outbox.pop_front() {
            match self.send(&client_id, &item).await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                }
                Err(err) => {
                    tracing::warn!(
                        interest = %item.interest,
                        err = %err,
                        "native-push interest change failed, re-queuing at head"
                    );
                    self.consecutive_failures += 1;
                    self.outbox.push_front(item);
                    if self.consecutive_failures >= RETRY_CEILING {
                        tracing::error!("native-push outbox paused after exhausting retry ceiling");
                        self.paused = true;
                    }
                    break;
                }
            }
        }
    }

    async fn send(&self, client_id: &str, item: &OutboxItem) -> Result<(), Error> {
        let url =
            format!("{}/client_api/v1/clients/{}/interests/{}", self.base_url, client_id, item.interest);
        let body = InterestRequest { app_key: &self.app_key };
        let resp = self
            .http
            .request(item.change.method(), &url)
            .json(&body)
            .send()
            .await
            .map_err(|source| Error::AuthTransport {
                channel: crate::event::ChannelName::new(item.interest.clone()),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(Error::AuthResponse {
                channel: crate::event::ChannelName::new(item.interest.clone()),
                detail: format!("interest change rejected with status {}", resp.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_maps_to_http_verb() {
        assert_eq!(Change::Subscribe.method(), reqwest::Method::POST);
        assert_eq!(Change::Unsubscribe.method(), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn queued_interests_wait_for_client_id() {
        let mut client = PushClient::new("https://push.example.com", "KEY");
        client.subscribe_interest("sports").await;
        assert_eq!(client.outbox.len(), 1);
        assert!(client.client_id().is_none());
    }

    #[tokio::test]
    async fn no_dedup_on_rapid_subscribe_unsubscribe() {
        let mut client = PushClient::new("https://push.example.com", "KEY");
        client.subscribe_interest("sports").await;
        client.unsubscribe_interest("sports").await;
        assert_eq!(client.outbox.len(), 2);
    }
}
