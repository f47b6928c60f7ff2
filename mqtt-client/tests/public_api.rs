// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Exercises the crate's public surface only - `ClientConfig`, `Message`,
//! `Subscription` and `ClientError` - the parts reachable from outside the
//! crate. Deeper engine/reconnect scenarios live inline in `src/engine.rs`,
//! beside the state they cover.

use std::time::Duration;

use mqtt_client::{ClientConfig, ClientError, Message, QoS, ReconnectMode, Subscription};

fn addr() -> std::net::SocketAddr {
    "127.0.0.1:1883".parse().unwrap()
}

#[test]
fn test_config_builder_round_trips_values() {
    let mut config = ClientConfig::new(addr(), "test-client").unwrap();
    config
        .set_clean_session(false)
        .set_keep_alive_interval(Duration::from_secs(15))
        .set_max_inflight(5)
        .set_reconnect_mode(ReconnectMode::Never);

    assert_eq!(config.client_id(), "test-client");
    assert!(!config.clean_session());
    assert_eq!(config.keep_alive_interval(), Duration::from_secs(15));
    assert_eq!(config.max_inflight(), 5);
    assert!(matches!(config.reconnect_mode(), ReconnectMode::Never));
}

#[test]
fn test_config_rejects_invalid_client_ids() {
    assert!(matches!(
        ClientConfig::new(addr(), ""),
        Err(ClientError::InvalidClientId)
    ));
    assert!(matches!(
        ClientConfig::new(addr(), "x".repeat(24)),
        Err(ClientError::InvalidClientId)
    ));
    assert!(ClientConfig::new(addr(), "x".repeat(23)).is_ok());
}

#[test]
fn test_message_and_subscription_builders() {
    let message = Message::new("a/b", b"hello".to_vec(), QoS::AtLeastOnce).with_retain(true);
    assert_eq!(message.topic, "a/b");
    assert_eq!(message.payload, b"hello");
    assert!(message.retain);

    let subscription = Subscription::new("a/#", QoS::ExactlyOnce);
    assert_eq!(subscription.topic_filter, "a/#");
    assert_eq!(subscription.qos, QoS::ExactlyOnce);
}

#[test]
fn test_error_messages_are_human_readable() {
    assert_eq!(ClientError::ClientShutdown.to_string(), "client is shutting down");
    assert_eq!(
        ClientError::NoAvailablePacketIdentifier.to_string(),
        "no packet identifier is available; too many in-flight requests"
    );
}
