// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mqtt_codec::{PublishPacket, QoS, SubscribeTopic};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::dispatcher::ListenerId;
use crate::error::ClientError;
use crate::message::Message;
use crate::request::{
    DisconnectRequest, PublishQos0Request, PublishQos1Request, PublishQos2Request, Request,
    RequestValue, SubscribeRequest, UnsubscribeRequest,
};
use crate::subscription::{Subscription, SubscriptionResult};
use crate::supervisor::{EngineCommand, Supervisor};

/// Handle to a listener registered via [`Client::add_message_listener`].
/// Dropping it leaves the listener registered; call [`ListenerHandle::stop`]
/// to deregister it.
pub struct ListenerHandle {
    id: ListenerId,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl ListenerHandle {
    pub fn stop(self) {
        let _ = self.commands.send(EngineCommand::RemoveListener(self.id));
    }
}

/// Public surface of this crate: connect, publish, subscribe, unsubscribe,
/// disconnect, and register message listeners. Everything else - the
/// request engine, the connection supervisor, the per-request state
/// machines - is reachable only through these methods.
pub struct Client {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<EngineCommand>,
    task: JoinHandle<()>,
}

impl Client {
    /// Spawns the connection supervisor and awaits the outcome of the first
    /// connect attempt - transport open plus the CONNECT/CONNACK handshake.
    /// Every reconnect after that is handled internally per
    /// [`crate::config::ReconnectMode`] and does not resurface here.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be opened, the handshake
    /// fails, or the broker refuses the connection (including an
    /// authentication-class CONNACK, which also stops the supervisor from
    /// retrying).
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (supervisor, commands, ready) = Supervisor::new(config.clone());
        let task = tokio::spawn(supervisor.run());
        ready.await??;
        Ok(Self {
            config,
            commands,
            task,
        })
    }

    async fn submit(&self, request: Box<dyn Request>) -> Result<RequestValue, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(EngineCommand::Submit {
            request,
            completion: tx,
        })?;
        rx.await?
    }

    /// # Errors
    /// Returns an error if the topic is invalid, no packet identifier is
    /// available (QoS>=1), or the request fails per the transitions in the
    /// per-request state machine for this QoS level.
    pub async fn publish(&self, message: Message) -> Result<(), ClientError> {
        let mut packet = PublishPacket::new(&message.topic, message.qos, message.payload)?;
        packet.set_retain(message.retain);
        let request: Box<dyn Request> = match message.qos {
            QoS::AtMostOnce => Box::new(PublishQos0Request::new(packet)),
            QoS::AtLeastOnce => Box::new(PublishQos1Request::new(
                packet,
                self.config.publish_retry_interval(),
            )),
            QoS::ExactlyOnce => Box::new(PublishQos2Request::new(
                packet,
                self.config.publish_retry_interval(),
            )),
        };
        self.submit(request).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if `subscriptions` is empty, any filter is
    /// malformed, the connection drops before a SUBACK arrives, or the
    /// subscription timeout elapses first.
    pub async fn subscribe(
        &self,
        subscriptions: Vec<Subscription>,
    ) -> Result<Vec<SubscriptionResult>, ClientError> {
        let topics = subscriptions
            .into_iter()
            .map(|s| SubscribeTopic {
                topic_filter: s.topic_filter,
                qos: s.qos,
            })
            .collect();
        let request = SubscribeRequest::new(topics, self.config.subscription_timeout_interval());
        match self.submit(Box::new(request)).await? {
            RequestValue::Subscribed(results) => Ok(results),
            _ => unreachable!("SubscribeRequest only ever resolves Subscribed"),
        }
    }

    /// # Errors
    /// Returns an error if `topics` is empty, the connection drops before an
    /// UNSUBACK arrives, or the subscription timeout elapses first.
    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), ClientError> {
        let request = UnsubscribeRequest::new(topics, self.config.subscription_timeout_interval());
        self.submit(Box::new(request)).await?;
        Ok(())
    }

    /// Sends DISCONNECT and shuts the connection task down; no further
    /// requests may be submitted afterward.
    ///
    /// # Errors
    /// Returns an error if the connection task is already gone.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let _ = self.submit(Box::new(DisconnectRequest)).await;
        self.commands.send(EngineCommand::Shutdown)?;
        Ok(())
    }

    /// Registers a listener invoked for every inbound PUBLISH, once per
    /// broker-side message (QoS-2 duplicates are deduplicated before this
    /// callback runs).
    ///
    /// # Errors
    /// Returns an error if the connection task is already gone.
    pub async fn add_message_listener(
        &self,
        listener: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Result<ListenerHandle, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(EngineCommand::AddListener {
            listener: Box::new(listener),
            reply: tx,
        })?;
        let id = rx.await?;
        Ok(ListenerHandle {
            id,
            commands: self.commands.clone(),
        })
    }

    /// Aborts the connection task without a graceful DISCONNECT. Prefer
    /// [`Client::disconnect`] when the broker is still reachable.
    pub fn abort(&self) {
        self.task.abort();
    }
}
