// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::VecDeque;
use std::time::Instant;

use mqtt_codec::Packet;
use tokio::sync::oneshot;

use crate::dispatcher::{DispatchAck, Dispatcher};
use crate::error::ClientError;
use crate::packet_id::PacketIdAllocator;
use crate::request::{Request, RequestContext, RequestOutcome, RequestValue};

type Completion = oneshot::Sender<Result<RequestValue, ClientError>>;

struct Entry {
    request: Box<dyn Request>,
    completion: Option<Completion>,
    deadline: Option<Instant>,
}

/// Connection state as mirrored into the engine by the supervisor's
/// `connected`/`disconnected` lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Active { session_present: bool },
}

/// Owns the pending queue and in-flight set, drives every in-flight
/// request's state machine, and allocates packet identifiers. All mutation
/// happens from the single task that also owns the transport - no locking
/// is needed between these fields, per the crate's single-threaded
/// cooperative concurrency model.
pub struct Engine {
    state: ConnectionState,
    max_inflight: usize,
    queue: VecDeque<Entry>,
    in_flight: Vec<Entry>,
    packet_ids: PacketIdAllocator,
    dispatcher: Dispatcher,
    outbound: Vec<Packet>,
}

impl Engine {
    #[must_use]
    pub fn new(max_inflight: usize) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            max_inflight,
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            packet_ids: PacketIdAllocator::new(),
            dispatcher: Dispatcher::new(),
            outbound: Vec::new(),
        }
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Active { .. })
    }

    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || !self.in_flight.is_empty()
    }

    /// Enqueue a new request and immediately attempt admission - the queue
    /// may drain straight through if the connection is Active and under the
    /// `maxInflight` cap.
    pub fn submit(&mut self, request: Box<dyn Request>, completion: Completion) {
        self.queue.push_back(Entry {
            request,
            completion: Some(completion),
            deadline: None,
        });
        self.admit();
    }

    fn admit(&mut self) {
        loop {
            if self.in_flight.len() >= self.max_inflight {
                break;
            }
            let can_start = match self.queue.front() {
                Some(entry) => self.is_active() || entry.request.can_perform_in_inactive_state(),
                None => break,
            };
            if !can_start {
                break;
            }
            let mut entry = self.queue.pop_front().expect("front checked above");
            let mut next_timer = None;
            let outcome = {
                let mut ctx =
                    RequestContext::new(&mut self.packet_ids, &mut self.outbound, &mut next_timer);
                entry.request.start(&mut ctx)
            };
            entry.deadline = next_timer.map(|d| Instant::now() + d);
            self.finish_or_keep(entry, outcome);
        }
    }

    fn finish_or_keep(&mut self, mut entry: Entry, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Pending => self.in_flight.push(entry),
            RequestOutcome::Done(result) => {
                // Every terminal transition in the per-request state machines
                // releases its own packet id; this is a backstop in case one
                // doesn't, so a bug there degrades to "id briefly unavailable"
                // rather than "id leaked forever".
                if let Some(id) = entry.request.packet_id() {
                    self.packet_ids.release(id);
                }
                if let Some(completion) = entry.completion.take() {
                    let _ = completion.send(result);
                }
            }
        }
    }

    /// Route one inbound packet. PUBLISH and PUBREL go to the dispatcher
    /// first and never reach a request's `handle_packet`; every other
    /// packet (including the acks PUBLISH itself provokes) is offered to
    /// every in-flight entry.
    pub fn handle_inbound(&mut self, packet: Packet) {
        match &packet {
            Packet::Publish(p) => {
                let ack = self.dispatcher.handle_publish(p);
                self.emit_dispatch_ack(ack);
                return;
            }
            Packet::PublishRelease(p) => {
                let ack = self.dispatcher.handle_publish_release(p);
                self.emit_dispatch_ack(ack);
                return;
            }
            _ => {}
        }
        self.dispatch_to_in_flight(true, |request, ctx| request.handle_packet(&packet, ctx));
    }

    fn emit_dispatch_ack(&mut self, ack: DispatchAck) {
        match ack {
            DispatchAck::None => {}
            DispatchAck::PublishAck(p) => self.outbound.push(Packet::PublishAck(p)),
            DispatchAck::PublishReceived(p) => self.outbound.push(Packet::PublishReceived(p)),
            DispatchAck::PublishComplete(p) => self.outbound.push(Packet::PublishComplete(p)),
        }
    }

    /// Mark the connection Active and let every in-flight entry (and then
    /// the queue) react - QoS-1/2 publishes parked by a prior `disconnected`
    /// self-resume from here.
    pub fn connected(&mut self, session_present: bool) {
        self.state = ConnectionState::Active { session_present };
        self.dispatch_to_in_flight(true, move |request, ctx| {
            request.connected(session_present, ctx)
        });
        self.admit();
    }

    /// Drop to Disconnected and let every in-flight entry react. Per §4.4,
    /// every request's timer is cancelled on disconnect regardless of
    /// whether that request calls back into `schedule_after`.
    pub fn disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.dispatch_to_in_flight(false, |request, ctx| request.disconnected(ctx));
    }

    /// Fire `handle_timer` on every in-flight entry whose deadline has
    /// passed. Called periodically from the supervisor's select loop - a
    /// hand-rolled deadline check rather than one `Sleep` per entry.
    pub fn poll_timers(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.in_flight.len() {
            let expired = self.in_flight[index].deadline.is_some_and(|d| d <= now);
            if !expired {
                index += 1;
                continue;
            }
            let mut entry = self.in_flight.remove(index);
            entry.deadline = None;
            let mut next_timer = None;
            let outcome = {
                let mut ctx =
                    RequestContext::new(&mut self.packet_ids, &mut self.outbound, &mut next_timer);
                entry.request.handle_timer(&mut ctx)
            };
            entry.deadline = next_timer.map(|d| Instant::now() + d);
            self.finish_or_keep(entry, outcome);
        }
        self.admit();
    }

    fn dispatch_to_in_flight(
        &mut self,
        preserve_timer: bool,
        mut call: impl FnMut(&mut Box<dyn Request>, &mut RequestContext) -> RequestOutcome,
    ) {
        let mut index = 0;
        while index < self.in_flight.len() {
            let mut next_timer = if preserve_timer {
                self.in_flight[index]
                    .deadline
                    .map(|d| d.saturating_duration_since(Instant::now()))
            } else {
                None
            };
            let outcome = {
                let entry = &mut self.in_flight[index];
                let mut ctx = RequestContext::new(
                    &mut self.packet_ids,
                    &mut self.outbound,
                    &mut next_timer,
                );
                call(&mut entry.request, &mut ctx)
            };
            match outcome {
                RequestOutcome::Pending => {
                    self.in_flight[index].deadline = next_timer.map(|d| Instant::now() + d);
                    index += 1;
                }
                RequestOutcome::Done(result) => {
                    let entry = self.in_flight.remove(index);
                    self.finish_or_keep(entry, RequestOutcome::Done(result));
                }
            }
        }
        self.admit();
    }

    /// Fail every queued and in-flight entry with an error built by
    /// `err_factory`, then drop them. Used for client shutdown; no further
    /// events are delivered to entries failed this way.
    pub fn fail_all(&mut self, err_factory: impl Fn() -> ClientError) {
        if self.has_pending_work() {
            log::info!(
                "failing {} queued and {} in-flight entries",
                self.queue.len(),
                self.in_flight.len()
            );
        }
        for mut entry in self.queue.drain(..) {
            if let Some(completion) = entry.completion.take() {
                let _ = completion.send(Err(err_factory()));
            }
        }
        for mut entry in self.in_flight.drain(..) {
            if let Some(id) = entry.request.packet_id() {
                self.packet_ids.release(id);
            }
            if let Some(completion) = entry.completion.take() {
                let _ = completion.send(Err(err_factory()));
            }
        }
    }

    /// Take this dispatch round's accumulated outbound packets so the
    /// supervisor can encode and flush them as a single batch.
    pub fn take_outbound(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbound)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mqtt_codec::{
        ConnectAckPacket, ConnectPacket, ConnectReturnCode, Packet, PublishAckPacket,
        PublishPacket, PublishReleasePacket, QoS, SubscribeTopic,
    };
    use tokio::sync::oneshot;

    use super::Engine;
    use crate::error::ClientError;
    use crate::message::Message;
    use crate::request::{
        ConnectRequest, PingRequest, PublishQos0Request, PublishQos1Request, RequestValue,
        SubscribeRequest,
    };

    fn submit(
        engine: &mut Engine,
        request: Box<dyn crate::request::Request>,
    ) -> oneshot::Receiver<Result<RequestValue, ClientError>> {
        let (tx, rx) = oneshot::channel();
        engine.submit(request, tx);
        rx
    }

    // Scenario 1: clean QoS-0 publish completes as soon as it's written.
    #[test]
    fn test_clean_qos0_publish() {
        let mut engine = Engine::new(20);
        engine.connected(false);
        let packet = PublishPacket::new("a", QoS::AtMostOnce, b"x".to_vec()).unwrap();
        let mut rx = submit(&mut engine, Box::new(PublishQos0Request::new(packet)));
        assert!(matches!(rx.try_recv(), Ok(Ok(RequestValue::Unit))));
        let outbound = engine.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert!(matches!(&outbound[0], Packet::Publish(p) if p.topic() == "a" && !p.dup()));
    }

    // Scenario 2: a QoS-1 publish in flight at disconnect resumes with
    // DUP=1 on the same packet identifier once the session is retained.
    #[test]
    fn test_qos1_publish_resumes_with_dup_after_reconnect() {
        let mut engine = Engine::new(20);
        engine.connected(false);
        let packet = PublishPacket::new("a/b", QoS::AtLeastOnce, vec![]).unwrap();
        let mut rx = submit(&mut engine, Box::new(PublishQos1Request::new(packet, Duration::from_secs(5))));
        let first = engine.take_outbound();
        assert_eq!(first.len(), 1);
        let (first_id, first_dup) = match &first[0] {
            Packet::Publish(p) => (p.packet_id().unwrap(), p.dup()),
            _ => panic!("expected publish"),
        };
        assert!(!first_dup);

        engine.disconnected();
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

        engine.connected(true);
        let resent = engine.take_outbound();
        assert_eq!(resent.len(), 1);
        match &resent[0] {
            Packet::Publish(p) => {
                assert!(p.dup());
                assert_eq!(p.packet_id(), Some(first_id));
            }
            _ => panic!("expected publish"),
        }

        engine.handle_inbound(Packet::PublishAck(PublishAckPacket::new(first_id)));
        assert!(matches!(rx.try_recv(), Ok(Ok(RequestValue::Unit))));
    }

    // Scenario 3: a duplicate QoS-2 inbound publish still gets acked every
    // time, but only invokes the listener once.
    #[test]
    fn test_qos2_inbound_duplicate_acks_every_time_notifies_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut engine = Engine::new(20);
        engine.connected(true);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        engine
            .dispatcher_mut()
            .add_listener(Box::new(move |_msg: &Message| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }));

        let mut packet = PublishPacket::new("t", QoS::ExactlyOnce, vec![]).unwrap();
        packet.set_packet_id(7);
        engine.handle_inbound(Packet::Publish(packet.clone()));
        engine.handle_inbound(Packet::Publish(packet.with_dup(true)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let acks = engine.take_outbound();
        assert_eq!(acks.len(), 2);
        assert!(acks
            .iter()
            .all(|p| matches!(p, Packet::PublishReceived(ack) if ack.packet_id() == 7)));

        engine.handle_inbound(Packet::PublishRelease(PublishReleasePacket::new(7)));
        let comp = engine.take_outbound();
        assert_eq!(comp.len(), 1);
        assert!(matches!(&comp[0], Packet::PublishComplete(ack) if ack.packet_id() == 7));
    }

    // Scenario 4: a SUBACK that never arrives fails the request with
    // Timeout once the subscription timeout elapses.
    #[test]
    fn test_subscribe_timeout() {
        let mut engine = Engine::new(20);
        engine.connected(true);
        let topics = vec![SubscribeTopic {
            topic_filter: "t".to_string(),
            qos: QoS::AtMostOnce,
        }];
        let mut rx = submit(
            &mut engine,
            Box::new(SubscribeRequest::new(topics, Duration::from_millis(1))),
        );
        engine.take_outbound();
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        engine.poll_timers(std::time::Instant::now() + Duration::from_millis(2));
        assert!(matches!(rx.try_recv(), Ok(Err(ClientError::Timeout))));
    }

    // Scenario 5: CONNACK with an authentication-class return code fails the
    // connect request with an error the supervisor recognizes as terminal.
    #[test]
    fn test_connect_auth_refusal_is_not_retriable() {
        let mut engine = Engine::new(20);
        let connect_packet = ConnectPacket::new("c1").unwrap();
        let mut rx = submit(
            &mut engine,
            Box::new(ConnectRequest::new(connect_packet, Duration::from_secs(5))),
        );
        engine.handle_inbound(Packet::ConnectAck(ConnectAckPacket::new(
            false,
            ConnectReturnCode::NotAuthorized,
        )));
        match rx.try_recv() {
            Ok(Err(ClientError::ConnectionRefused(code))) => {
                assert!(code.is_auth_failure());
            }
            other => panic!("expected auth refusal, got {other:?}"),
        }
    }

    // Scenario 6: no PINGRESP within the keep-alive timeout fails the ping
    // with KeepAliveTimeout, the signal the supervisor uses to close the
    // transport.
    #[test]
    fn test_keep_alive_timeout() {
        let mut engine = Engine::new(20);
        engine.connected(true);
        let mut rx = submit(
            &mut engine,
            Box::new(PingRequest::new(Duration::from_millis(1))),
        );
        engine.take_outbound();
        engine.poll_timers(std::time::Instant::now() + Duration::from_millis(2));
        assert!(matches!(rx.try_recv(), Ok(Err(ClientError::KeepAliveTimeout))));
    }

    #[test]
    fn test_max_inflight_caps_admission() {
        let mut engine = Engine::new(1);
        engine.connected(true);
        let p1 = PublishPacket::new("a", QoS::AtLeastOnce, vec![]).unwrap();
        let p2 = PublishPacket::new("b", QoS::AtLeastOnce, vec![]).unwrap();
        let _rx1 = submit(&mut engine, Box::new(PublishQos1Request::new(p1, Duration::from_secs(5))));
        let mut rx2 = submit(&mut engine, Box::new(PublishQos1Request::new(p2, Duration::from_secs(5))));
        // Only the first publish should have been written; the second stays
        // queued until the first's ack frees a slot.
        assert_eq!(engine.take_outbound().len(), 1);
        assert!(matches!(rx2.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }
}
