//! Client for a hosted publish/subscribe messaging service over WebSocket.
//!
//! Connects to the service, subscribes to public, private, and presence
//! channels, authenticates restricted subscriptions, dispatches inbound
//! events to registered bindings, and reconnects automatically with
//! exponential backoff driven by a pluggable reachability monitor.
//!
//! ```no_run
//! use pulse_client::{Client, Options};
//!
//! # async fn run() {
//! let client = Client::new(Options::new("APP_KEY"));
//! client.connect().unwrap();
//! let channel = client.subscribe("news");
//! channel.bind("greeting", |payload| println!("{payload:?}"));
//! # }
//! ```

mod auth;
mod channel;
mod client;
mod connection;
mod error;
mod event;
mod options;
mod reachability;
mod registry;

#[cfg(feature = "push")]
pub mod push;

pub use channel::{EventCallback, MemberCallback};
pub use client::{ChannelHandle, Client};
pub use connection::{ConnectionState, SubscriptionErrorInfo};
pub use error::{Error, Result};
pub use event::{BindingId, ChannelData, ChannelName, ChannelType, Member, Payload};
pub use options::{AuthRequestBuilder, AuthStrategy, Options, UserDataProvider};
pub use reachability::{ManualReachability, ReachabilityEvent, ReachabilityMonitor, SystemReachability};
