// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{Packet, PacketId, PublishPacket};

use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// Resumes across reconnect per §4.4: a disconnect parks the request rather
/// than failing it; the next `connected` re-emits with dup set according to
/// whether the broker kept the session.
pub struct PublishQos1Request {
    packet: PublishPacket,
    packet_id: Option<PacketId>,
    retry_interval: Duration,
    awaiting_reconnect: bool,
}

impl PublishQos1Request {
    #[must_use]
    pub fn new(packet: PublishPacket, retry_interval: Duration) -> Self {
        Self {
            packet,
            packet_id: None,
            retry_interval,
            awaiting_reconnect: false,
        }
    }

    fn emit(&mut self, ctx: &mut RequestContext, dup: bool) {
        let id = self.packet_id.expect("packet id allocated in start()");
        let mut packet = self.packet.with_dup(dup);
        packet.set_packet_id(id);
        ctx.emit(Packet::Publish(packet));
        ctx.schedule_after(self.retry_interval);
    }
}

impl Request for PublishQos1Request {
    fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        let id = match ctx.allocate_packet_id() {
            Ok(id) => id,
            Err(e) => return RequestOutcome::Done(Err(e)),
        };
        self.packet_id = Some(id);
        self.emit(ctx, false);
        RequestOutcome::Pending
    }

    fn handle_packet(&mut self, packet: &Packet, ctx: &mut RequestContext) -> RequestOutcome {
        let Packet::PublishAck(ack) = packet else {
            return RequestOutcome::Pending;
        };
        if Some(ack.packet_id()) != self.packet_id {
            return RequestOutcome::Pending;
        }
        ctx.release_packet_id(ack.packet_id());
        RequestOutcome::Done(Ok(RequestValue::Unit))
    }

    fn disconnected(&mut self, _ctx: &mut RequestContext) -> RequestOutcome {
        self.awaiting_reconnect = true;
        RequestOutcome::Pending
    }

    fn connected(&mut self, session_present: bool, ctx: &mut RequestContext) -> RequestOutcome {
        if !self.awaiting_reconnect {
            return RequestOutcome::Pending;
        }
        self.awaiting_reconnect = false;
        self.emit(ctx, session_present);
        RequestOutcome::Pending
    }

    fn handle_timer(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        if self.awaiting_reconnect {
            return RequestOutcome::Pending;
        }
        self.emit(ctx, true);
        RequestOutcome::Pending
    }
}
