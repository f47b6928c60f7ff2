// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mqtt_codec::{Packet, PublishPacket};

use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

/// A QoS-0 publish completes as soon as it's written; it never becomes
/// in-flight across a reconnect because there is nothing to resume.
pub struct PublishQos0Request {
    packet: PublishPacket,
}

impl PublishQos0Request {
    #[must_use]
    pub fn new(packet: PublishPacket) -> Self {
        Self { packet }
    }
}

impl Request for PublishQos0Request {
    fn start(&mut self, ctx: &mut RequestContext) -> RequestOutcome {
        ctx.emit(Packet::Publish(self.packet.clone()));
        RequestOutcome::Done(Ok(RequestValue::Unit))
    }
}
