// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{Packet, PacketId, PublishPacket, PublishReleasePacket};

use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

#[derive(PartialEq, Eq)]
enum State {
    AwaitingPubrec,
    AwaitingPubcomp,
}

/// Two-phase handshake: PUBLISH -> PUBREC -> PUBREL -> PUBCOMP. Reconnect
/// resumes whichever phase was in progress, per §4.4.
pub struct PublishQos2Request {
    packet: PublishPacket,
    packet_id: Option<PacketId>,
    state: State,
    retry_interval: Duration,
    awaiting_reconnect: bool,
}

impl PublishQos2Request {
    #[must_use]
    pub fn new(packet: PublishPacket, retry_interval: Duration) -> Self {
        Self {
            packet,
            packet_id: None,
            state: State::AwaitingPubrec,
            retry_interval,
            awaiting_reconnect: false,
        }
    }

    fn id(&self) -> PacketId {
        self.packet_id.expect("packet id allocated in start()")
    }

    /// Emit the packet for the current phase. `dup` only matters for the
    /// `AwaitingPubrec` phase (PUBLISH); PUBREL carries no dup flag.
    fn emit_current(&mut self, ctx: &mut RequestContext, dup: bool) {
        match self.state {
            State::AwaitingPubrec => {
                let id = self.id();
                let mut packet = self.packet.with_dup(dup);
                packet.set_packet_id(id);
                ctx.emit(Packet::Publish(packet));
            }
            State::AwaitingPubcomp => {
                ctx.emit(Packet::PublishRelease(PublishReleasePacket::new(self.id())));
            }
        }
        ctx.schedule_after(self.retry_interval);
    }
}

impl Request for PublishQos2Request {
    fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        let id = match ctx.allocate_packet_id() {
            Ok(id) => id,
            Err(e) => return RequestOutcome::Done(Err(e)),
        };
        self.packet_id = Some(id);
        self.emit_current(ctx, false);
        RequestOutcome::Pending
    }

    fn handle_packet(&mut self, packet: &Packet, ctx: &mut RequestContext) -> RequestOutcome {
        match (packet, &self.state) {
            (Packet::PublishReceived(ack), State::AwaitingPubrec)
                if Some(ack.packet_id()) == self.packet_id =>
            {
                self.state = State::AwaitingPubcomp;
                self.emit_current(ctx, false);
                RequestOutcome::Pending
            }
            (Packet::PublishComplete(ack), State::AwaitingPubcomp)
                if Some(ack.packet_id()) == self.packet_id =>
            {
                ctx.release_packet_id(ack.packet_id());
                RequestOutcome::Done(Ok(RequestValue::Unit))
            }
            _ => RequestOutcome::Pending,
        }
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
        if session_present {
            let dup = self.state == State::AwaitingPubrec;
            self.emit_current(ctx, dup);
        } else {
            self.state = State::AwaitingPubrec;
            self.emit_current(ctx, false);
        }
        RequestOutcome::Pending
    }

    fn handle_timer(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        if self.awaiting_reconnect {
            return RequestOutcome::Pending;
        }
        let dup = self.state == State::AwaitingPubrec;
        self.emit_current(ctx, dup);
        RequestOutcome::Pending
    }
}
