// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{Packet, PacketId, UnsubscribePacket};

use crate::error::ClientError;
use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// Symmetric to [`crate::request::SubscribeRequest`] over UNSUBSCRIBE/UNSUBACK.
pub struct UnsubscribeRequest {
    topics: Vec<String>,
    packet_id: Option<PacketId>,
    timeout: Duration,
}

impl UnsubscribeRequest {
    #[must_use]
    pub fn new(topics: Vec<String>, timeout: Duration) -> Self {
        Self {
            topics,
            packet_id: None,
            timeout,
        }
    }
}

impl Request for UnsubscribeRequest {
    fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        let id = match ctx.allocate_packet_id() {
            Ok(id) => id,
            Err(e) => return RequestOutcome::Done(Err(e)),
        };
        self.packet_id = Some(id);
        match UnsubscribePacket::new(id, self.topics.clone()) {
            Ok(packet) => {
                ctx.emit(Packet::Unsubscribe(packet));
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
        let Packet::UnsubscribeAck(ack) = packet else {
            return RequestOutcome::Pending;
        };
        if Some(ack.packet_id()) != self.packet_id {
            return RequestOutcome::Pending;
        }
        ctx.release_packet_id(ack.packet_id());
        RequestOutcome::Done(Ok(RequestValue::Unit))
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
