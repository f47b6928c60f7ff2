// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Async MQTT 3.1.1 client built on [`mqtt_codec`]. One I/O task per
//! [`Client`], external operations submitted over a channel and awaited
//! through a oneshot per request.

mod client;
mod config;
mod dispatcher;
mod engine;
mod error;
mod message;
mod packet_id;
mod request;
mod subscription;
mod supervisor;
mod transport;

pub use client::{Client, ListenerHandle};
pub use config::{ClientConfig, Credentials, ReconnectMode, TransportKind, Will};
pub use error::ClientError;
pub use message::Message;
pub use subscription::{Subscription, SubscriptionResult};

pub use mqtt_codec::QoS;
