// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mqtt_codec::{DisconnectPacket, Packet};

use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// Emits DISCONNECT and completes immediately; the caller (supervisor) is
/// responsible for closing the write side afterwards.
pub struct DisconnectRequest;

impl Request for DisconnectRequest {
    fn can_perform_in_inactive_state(&self) -> bool {
        true
    }

    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        ctx.emit(Packet::Disconnect(DisconnectPacket));
        RequestOutcome::Done(Ok(RequestValue::Unit))
    }
}
