// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{Packet, PacketId, SubscribePacket, SubscribeTopic};

use crate::error::ClientError;
use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};
use crate::subscription::SubscriptionResult;

/// Subscriptions do not survive a lost connection at this layer: a
/// disconnect while pending fails the request rather than resuming it
/// after reconnect (see the design notes on subscribe/unsubscribe resumption).
pub struct SubscribeRequest {
    topics: Vec<SubscribeTopic>,
    packet_id: Option<PacketId>,
    timeout: Duration,
}

impl SubscribeRequest {
    #[must_use]
    pub fn new(topics: Vec<SubscribeTopic>, timeout: Duration) -> Self {
        Self {
            topics,
            packet_id: None,
            timeout,
        }
    }
}

impl Request for SubscribeRequest {
    fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        let id = match ctx.allocate_packet_id() {
            Ok(id) => id,
            Err(e) => return RequestOutcome::Done(Err(e)),
        };
        self.packet_id = Some(id);
        match SubscribePacket::new(id, self.topics.clone()) {
            Ok(packet) => {
                ctx.emit(Packet::Subscribe(packet));
                ctx.schedule_after(self.timeout);
                RequestOutcome::Pending
            }
            Err(e) => {
                ctx.release_packet_id(id);
                RequestOutcome::Done(Err(ClientError::Protocol(e)))
            }
        }
    }

    fn handle_packet(&mut self, packet: &Packet, ctx: &mut RequestContext) -> RequestOutcome {
        let Packet::SubscribeAck(ack) = packet else {
            return RequestOutcome::Pending;
        };
        if Some(ack.packet_id()) != self.packet_id {
            return RequestOutcome::Pending;
        }
        ctx.release_packet_id(ack.packet_id());
        let results: Vec<SubscriptionResult> = ack
            .results()
            .iter()
            .copied()
            .map(SubscriptionResult::from)
            .collect();
        RequestOutcome::Done(Ok(RequestValue::Subscribed(results)))
    }

    fn disconnected(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        if let Some(id) = self.packet_id.take() {
            ctx.release_packet_id(id);
        }
        RequestOutcome::Done(Err(ClientError::ConnectionClosed))
    }

    fn handle_timer(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        if let Some(id) = self.packet_id.take() {
            ctx.release_packet_id(id);
        }
        RequestOutcome::Done(Err(ClientError::Timeout))
    }
}
