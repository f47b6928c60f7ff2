// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use mqtt_codec::{Packet, PingRequestPacket};

use crate::error::ClientError;
use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// Internal request issued by the supervisor to probe a connection that has
/// been idle for `keepAliveInterval`.
pub struct PingRequest {
    timeout: Duration,
}

impl PingRequest {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Request for PingRequest {
    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        ctx.emit(Packet::PingRequest(PingRequestPacket));
        ctx.schedule_after(self.timeout);
        RequestOutcome::Pending
    }

    fn handle_packet(&mut self, packet: &Packet, _ctx: &mut RequestContext) -> RequestOutcome {
        if matches!(packet, Packet::PingResponse(_)) {
            RequestOutcome::Done(Ok(RequestValue::Unit))
        } else {
            RequestOutcome::Pending
        }
    }

    fn handle_timer(&mut self, _ctx: &mut RequestContext) -> RequestOutcome {
        RequestOutcome::Done(Err(ClientError::KeepAliveTimeout))
    }

    fn disconnected(&mut self, _ctx: &mut RequestContext) -> RequestOutcome {
        RequestOutcome::Done(Err(ClientError::ConnectionClosed))
    }
}
