// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::net::SocketAddr;
use std::time::Duration;

use mqtt_codec::QoS;

use crate::error::ClientError;

/// Username/password credentials sent in the CONNECT packet.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Last-will message the broker publishes on our behalf if we disappear
/// without a clean DISCONNECT.
#[derive(Clone, Debug)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// How the supervisor reacts to an unexpected transport close.
#[derive(Clone, Debug)]
pub enum ReconnectMode {
    /// Never reconnect; fail in-flight work and stay `Disconnected`.
    Never,
    Retry {
        max_attempts: Option<u32>,
        initial_backoff: Duration,
        max_backoff: Duration,
        jitter: bool,
    },
}

impl Default for ReconnectMode {
    fn default() -> Self {
        ReconnectMode::Retry {
            max_attempts: None,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            jitter: true,
        }
    }
}

/// Transport to open when the supervisor connects.
#[derive(Clone, Debug)]
pub enum TransportKind {
    Tcp,
    Tls { domain: String },
    WebSocket { path: String },
}

/// Configuration surface, widening the teacher's `ConnectOptions` with the
/// full set of items this engine needs. Mutators follow the teacher's
/// `set_*(&mut self, ...) -> &mut Self` convention rather than a consuming
/// builder.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    address: SocketAddr,
    transport: TransportKind,
    client_id: String,
    clean_session: bool,
    keep_alive_interval: Duration,
    connect_timeout: Duration,
    publish_retry_interval: Duration,
    subscription_timeout_interval: Duration,
    max_inflight: usize,
    reconnect_mode: ReconnectMode,
    credentials: Option<Credentials>,
    will: Option<Will>,
}

impl ClientConfig {
    /// # Errors
    /// Returns [`ClientError::InvalidClientId`] if `client_id` is empty or
    /// longer than 23 bytes, matching the teacher's `check_client_id` rule.
    pub fn new(address: SocketAddr, client_id: impl Into<String>) -> Result<Self, ClientError> {
        let client_id = client_id.into();
        mqtt_codec::utils::check_client_id(&client_id).map_err(|_| ClientError::InvalidClientId)?;
        Ok(Self {
            address,
            transport: TransportKind::Tcp,
            client_id,
            clean_session: true,
            keep_alive_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            publish_retry_interval: Duration::from_secs(5),
            subscription_timeout_interval: Duration::from_secs(5),
            max_inflight: 20,
            reconnect_mode: ReconnectMode::default(),
            credentials: None,
            will: None,
        })
    }

    pub fn set_transport(&mut self, transport: TransportKind) -> &mut Self {
        self.transport = transport;
        self
    }

    pub const fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    pub const fn set_keep_alive_interval(&mut self, interval: Duration) -> &mut Self {
        self.keep_alive_interval = interval;
        self
    }

    pub const fn set_connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub const fn set_publish_retry_interval(&mut self, interval: Duration) -> &mut Self {
        self.publish_retry_interval = interval;
        self
    }

    pub const fn set_subscription_timeout_interval(&mut self, interval: Duration) -> &mut Self {
        self.subscription_timeout_interval = interval;
        self
    }

    pub const fn set_max_inflight(&mut self, max_inflight: usize) -> &mut Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn set_reconnect_mode(&mut self, mode: ReconnectMode) -> &mut Self {
        self.reconnect_mode = mode;
        self
    }

    pub fn set_credentials(&mut self, credentials: Credentials) -> &mut Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn set_will(&mut self, will: Will) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    #[must_use]
    pub const fn transport(&self) -> &TransportKind {
        &self.transport
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn publish_retry_interval(&self) -> Duration {
        self.publish_retry_interval
    }

    #[must_use]
    pub const fn subscription_timeout_interval(&self) -> Duration {
        self.subscription_timeout_interval
    }

    #[must_use]
    pub const fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    #[must_use]
    pub const fn reconnect_mode(&self) -> &ReconnectMode {
        &self.reconnect_mode
    }

    #[must_use]
    pub const fn credentials(&self) -> &Option<Credentials> {
        &self.credentials
    }

    #[must_use]
    pub const fn will(&self) -> &Option<Will> {
        &self.will
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_client_id() {
        let addr: SocketAddr = "127.0.0.1:1883".parse().unwrap();
        assert!(ClientConfig::new(addr, "").is_err());
    }

    #[test]
    fn test_rejects_oversized_client_id() {
        let addr: SocketAddr = "127.0.0.1:1883".parse().unwrap();
        let long_id = "x".repeat(24);
        assert!(ClientConfig::new(addr, long_id).is_err());
    }

    #[test]
    fn test_defaults() {
        let addr: SocketAddr = "127.0.0.1:1883".parse().unwrap();
        let config = ClientConfig::new(addr, "c1").unwrap();
        assert!(config.clean_session());
        assert_eq!(config.max_inflight(), 20);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(60));
    }
}
