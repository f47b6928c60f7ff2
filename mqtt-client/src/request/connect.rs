// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{ConnectPacket, ConnectReturnCode, Packet};

use crate::error::ClientError;
use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// The handshake request the supervisor submits once a transport is open.
/// May start while `ConnectionState != Active` - it's the one thing that
/// makes it `Active`.
pub struct ConnectRequest {
    packet: ConnectPacket,
    timeout: Duration,
}

impl ConnectRequest {
    #[must_use]
    pub fn new(packet: ConnectPacket, timeout: Duration) -> Self {
        Self { packet, timeout }
    }
}

impl Request for ConnectRequest {
    fn can_perform_in_inactive_state(&self) -> bool {
        true
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        ctx.emit(Packet::Connect(self.packet.clone()));
        ctx.schedule_after(self.timeout);
        RequestOutcome::Pending
    }

    fn handle_packet(&mut self, packet: &Packet, _ctx: &mut RequestContext) -> RequestOutcome {
        let Packet::ConnectAck(ack) = packet else {
            return RequestOutcome::Pending;
        };
        if ack.return_code() == ConnectReturnCode::Accepted {
            RequestOutcome::Done(Ok(RequestValue::SessionPresent(ack.session_present())))
        } else {
            RequestOutcome::Done(Err(ClientError::ConnectionRefused(ack.return_code())))
        }
    }

    fn disconnected(&mut self, _ctx: &mut RequestContext) -> RequestOutcome {
        RequestOutcome::Done(Err(ClientError::ConnectionClosed))
    }

    fn handle_timer(&mut self, _ctx: &mut RequestContext) -> RequestOutcome {
        RequestOutcome::Done(Err(ClientError::Timeout))
    }
}
