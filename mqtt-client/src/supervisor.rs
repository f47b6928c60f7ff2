// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::{Duration, Instant};

use mqtt_codec::{try_decode_packet, ConnectPacket, LastWill};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::config::{ClientConfig, ReconnectMode};
use crate::dispatcher::ListenerId;
use crate::engine::Engine;
use crate::error::ClientError;
use crate::message::Message;
use crate::request::{ConnectRequest, PingRequest, Request, RequestValue};
use crate::transport::{DuplexTransport, Transport};

const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(250);

/// External submission boundary between [`crate::client::Client`] and the
/// connection task driven by [`Supervisor::run`]. Delivered over an
/// unbounded channel so a caller never blocks on the single I/O task.
pub enum EngineCommand {
    Submit {
        request: Box<dyn Request>,
        completion: oneshot::Sender<Result<RequestValue, ClientError>>,
    },
    AddListener {
        listener: Box<dyn Fn(&Message) + Send + Sync>,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener(ListenerId),
    Shutdown,
}

/// Opens the transport, runs the CONNECT handshake, feeds inbound bytes to
/// the [`Engine`], batches its outbound packets back onto the wire, and
/// reconnects per [`ReconnectMode`] when the transport drops. Owns exactly
/// one connection's worth of state at a time; everything here runs on a
/// single spawned task.
pub struct Supervisor {
    config: ClientConfig,
    engine: Engine,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    /// Fires once, with the outcome of the very first connect attempt, so
    /// `Client::connect` can report handshake failure (including an
    /// authentication-class CONNACK) back to its caller. Every reconnect
    /// after that is handled internally per [`ReconnectMode`] and never
    /// touches this sender again.
    initial_connect: Option<oneshot::Sender<Result<(), ClientError>>>,
}

/// Why [`Supervisor::run_one_connection`] returned.
enum LoopExit {
    Shutdown,
    /// Transport closed or a non-fatal I/O error; eligible for reconnect.
    Disconnected,
    /// CONNACK carried an authentication-class return code; reconnecting
    /// with the same credentials would only fail the same way.
    AuthRejected,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: ClientConfig,
    ) -> (
        Self,
        mpsc::UnboundedSender<EngineCommand>,
        oneshot::Receiver<Result<(), ClientError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let max_inflight = config.max_inflight();
        let supervisor = Self {
            config,
            engine: Engine::new(max_inflight),
            commands: rx,
            initial_connect: Some(ready_tx),
        };
        (supervisor, tx, ready_rx)
    }

    /// Drives the client's whole lifetime. Returns once a `Shutdown` command
    /// is processed or the reconnect policy gives up; meant to be spawned as
    /// its own task and never awaited from the `Client` facade directly.
    pub async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            match self.run_one_connection().await {
                LoopExit::Shutdown => {
                    self.engine.fail_all(|| ClientError::ClientShutdown);
                    return;
                }
                LoopExit::AuthRejected => {
                    log::warn!("connect rejected on authentication grounds, not reconnecting");
                    return;
                }
                LoopExit::Disconnected => {
                    self.engine.disconnected();
                    match self.config.reconnect_mode().clone() {
                        ReconnectMode::Never => {
                            log::info!("reconnectMode=never, giving up");
                            self.engine.fail_all(|| ClientError::ConnectionClosed);
                            return;
                        }
                        ReconnectMode::Retry {
                            max_attempts,
                            initial_backoff,
                            max_backoff,
                            jitter,
                        } => {
                            attempt += 1;
                            if let Some(max) = max_attempts {
                                if attempt > max {
                                    log::warn!("exhausted {max} reconnect attempts, giving up");
                                    self.engine.fail_all(|| ClientError::ConnectionClosed);
                                    return;
                                }
                            }
                            let backoff =
                                Self::backoff_for(attempt, initial_backoff, max_backoff, jitter);
                            log::info!("reconnecting in {backoff:?} (attempt {attempt})");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }
    }

    fn backoff_for(attempt: u32, initial: Duration, max: Duration, jitter: bool) -> Duration {
        let scaled = initial.saturating_mul(1u32 << attempt.min(16));
        let capped = scaled.min(max);
        if jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.0);
            capped.mul_f64(factor)
        } else {
            capped
        }
    }

    fn build_connect_packet(&self) -> Result<ConnectPacket, ClientError> {
        let mut packet = ConnectPacket::new(self.config.client_id())?;
        packet.set_clean_session(self.config.clean_session());
        let keep_alive = self.config.keep_alive_interval().as_secs().min(u64::from(u16::MAX));
        packet.set_keep_alive(keep_alive as u16);
        if let Some(creds) = self.config.credentials() {
            packet.set_credentials(creds.username.clone(), creds.password.clone());
        }
        if let Some(will) = self.config.will() {
            packet.set_will(LastWill {
                topic: will.topic.clone(),
                message: will.payload.clone(),
                qos: will.qos,
                retain: will.retain,
            });
        }
        Ok(packet)
    }

    /// Runs one transport lifetime: connect, handshake, then the combined
    /// select loop for inbound bytes, external commands and the maintenance
    /// tick, until the transport drops or a `Shutdown` command arrives.
    async fn run_one_connection(&mut self) -> LoopExit {
        log::info!("opening transport to {}", self.config.address());
        let mut transport =
            match Transport::connect(self.config.address(), self.config.transport()).await {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("transport connect failed: {e}");
                    if let Some(tx) = self.initial_connect.take() {
                        let _ = tx.send(Err(ClientError::Io(e)));
                    }
                    return LoopExit::Disconnected;
                }
            };
        self.drive(&mut transport).await
    }

    /// The actual connect-handshake-plus-select-loop body, generic over
    /// [`DuplexTransport`] so tests can run it against an in-memory
    /// [`crate::transport::mock::MockTransport`] instead of a real socket.
    async fn drive<T: DuplexTransport>(&mut self, transport: &mut T) -> LoopExit {
        let connect_packet = match self.build_connect_packet() {
            Ok(p) => p,
            Err(e) => {
                log::error!("cannot build connect packet: {e}");
                if let Some(tx) = self.initial_connect.take() {
                    let _ = tx.send(Err(e));
                }
                return LoopExit::Disconnected;
            }
        };
        let (connect_tx, connect_rx) = oneshot::channel();
        self.engine.submit(
            Box::new(ConnectRequest::new(
                connect_packet,
                self.config.connect_timeout(),
            )),
            connect_tx,
        );
        let mut last_activity = Instant::now();
        match self.flush_outbound(transport).await {
            Ok(true) => last_activity = Instant::now(),
            Ok(false) => {}
            Err(_) => return LoopExit::Disconnected,
        }

        let mut read_buf = Vec::with_capacity(4096);
        let mut inbound = Vec::new();
        let mut maintenance = interval(MAINTENANCE_INTERVAL);
        let mut connect_rx = Some(connect_rx);
        let mut ping_rx: Option<oneshot::Receiver<Result<RequestValue, ClientError>>> = None;

        loop {
            tokio::select! {
                result = transport.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            log::info!("transport closed by peer");
                            return LoopExit::Disconnected;
                        }
                        Ok(_) => {
                            inbound.extend_from_slice(&read_buf);
                            read_buf.clear();
                            if self.drain_inbound(&mut inbound).is_err() {
                                return LoopExit::Disconnected;
                            }
                        }
                        Err(e) => {
                            log::warn!("transport read error: {e}");
                            return LoopExit::Disconnected;
                        }
                    }
                }
                _ = maintenance.tick() => {
                    self.engine.poll_timers(Instant::now());
                    // Idleness is measured by last outbound write, per
                    // SPEC_FULL.md §4.5 - a client that only receives
                    // broker pushes without ever writing still needs its
                    // own PINGREQs to keep the connection alive.
                    if self.engine.is_active()
                        && ping_rx.is_none()
                        && last_activity.elapsed() >= self.config.keep_alive_interval()
                    {
                        let (tx, rx) = oneshot::channel();
                        self.engine.submit(
                            Box::new(PingRequest::new(self.config.connect_timeout())),
                            tx,
                        );
                        ping_rx = Some(rx);
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(EngineCommand::Submit { request, completion }) => {
                            self.engine.submit(request, completion);
                        }
                        Some(EngineCommand::AddListener { listener, reply }) => {
                            let id = self.engine.dispatcher_mut().add_listener(listener);
                            let _ = reply.send(id);
                        }
                        Some(EngineCommand::RemoveListener(id)) => {
                            self.engine.dispatcher_mut().remove_listener(id);
                        }
                        Some(EngineCommand::Shutdown) | None => {
                            let _ = transport.shutdown().await;
                            return LoopExit::Shutdown;
                        }
                    }
                }
            }

            if let Some(rx) = connect_rx.as_mut() {
                if let Ok(result) = rx.try_recv() {
                    connect_rx = None;
                    match result {
                        Ok(RequestValue::SessionPresent(session_present)) => {
                            log::info!("connected, session_present={session_present}");
                            self.engine.connected(session_present);
                            if let Some(tx) = self.initial_connect.take() {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        Ok(_) => unreachable!("ConnectRequest only ever resolves SessionPresent"),
                        Err(ClientError::ConnectionRefused(code)) if code.is_auth_failure() => {
                            if let Some(tx) = self.initial_connect.take() {
                                let _ = tx.send(Err(ClientError::ConnectionRefused(code)));
                            }
                            return LoopExit::AuthRejected;
                        }
                        Err(e) => {
                            log::warn!("connect handshake failed: {e}");
                            if let Some(tx) = self.initial_connect.take() {
                                let _ = tx.send(Err(e));
                            }
                            return LoopExit::Disconnected;
                        }
                    }
                }
            }

            if let Some(rx) = ping_rx.as_mut() {
                if let Ok(result) = rx.try_recv() {
                    ping_rx = None;
                    if let Err(ClientError::KeepAliveTimeout) = result {
                        log::warn!("no pingresp within keep-alive timeout, closing transport");
                        return LoopExit::Disconnected;
                    }
                }
            }

            match self.flush_outbound(transport).await {
                Ok(true) => last_activity = Instant::now(),
                Ok(false) => {}
                Err(_) => return LoopExit::Disconnected,
            }
        }
    }

    /// Decode every whole packet currently buffered in `inbound`, feeding
    /// each to the engine, and leave any trailing partial packet in place
    /// for the next read.
    fn drain_inbound(&mut self, inbound: &mut Vec<u8>) -> Result<(), ClientError> {
        loop {
            match try_decode_packet(inbound) {
                Ok(Some((packet, consumed))) => {
                    inbound.drain(..consumed);
                    self.engine.handle_inbound(packet);
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    log::warn!("malformed packet on the wire: {e}");
                    return Err(ClientError::Protocol(e));
                }
            }
        }
    }

    /// Writes this dispatch round's outbound packets, if any. Returns
    /// whether a write actually happened, so callers can track idleness by
    /// last outbound write time per SPEC_FULL.md §4.5.
    async fn flush_outbound<T: DuplexTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<bool, ClientError> {
        let packets = self.engine.take_outbound();
        if packets.is_empty() {
            return Ok(false);
        }
        let mut buf = Vec::new();
        for packet in &packets {
            packet.encode(&mut buf)?;
        }
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use mqtt_codec::{ConnectAckPacket, ConnectReturnCode, Packet, PublishPacket, QoS};

    use super::{EngineCommand, Supervisor};
    use crate::config::ClientConfig;
    use crate::error::ClientError;
    use crate::request::PublishQos0Request;
    use crate::transport::mock::MockTransport;

    fn addr() -> SocketAddr {
        "127.0.0.1:1883".parse().unwrap()
    }

    // Scenario 1, at the wire-byte level: the CONNECT goes out before the
    // loop even starts reading, and a publish submitted while the handshake
    // is outstanding is queued until CONNACK arrives, then written plain
    // (no DUP) with its own fixed header.
    #[tokio::test]
    async fn test_clean_qos0_publish_observed_on_the_wire() {
        let config = ClientConfig::new(addr(), "c1").unwrap();
        let (mut supervisor, commands, ready) = Supervisor::new(config);

        let mut mock = MockTransport::new();
        let mut connack_bytes = Vec::new();
        Packet::ConnectAck(ConnectAckPacket::new(false, ConnectReturnCode::Accepted))
            .encode(&mut connack_bytes)
            .unwrap();
        mock.push_inbound(&connack_bytes);

        let packet = PublishPacket::new("a", QoS::AtMostOnce, b"x".to_vec()).unwrap();
        let (completion, _rx) = tokio::sync::oneshot::channel();
        commands
            .send(EngineCommand::Submit {
                request: Box::new(PublishQos0Request::new(packet)),
                completion,
            })
            .unwrap();

        // The connect handshake and publish submission race across select
        // branches, but the select loop always flushes at the end of every
        // iteration, so within a couple of iterations both have landed on
        // the wire regardless of which order they were observed in.
        let _ = tokio::time::timeout(Duration::from_millis(50), supervisor.drive(&mut mock)).await;

        // CONNECT is the first packet on the wire - fixed header type 0x10.
        assert_eq!(mock.outbound[0] >> 4, 0x01);
        // The PUBLISH trails it: fixed header 0x30 0x04, topic "a", payload "x",
        // matching MQTT 3.1.1's QoS-0, no-DUP, no-retain encoding exactly.
        assert!(mock.outbound.ends_with(&[0x30, 0x04, 0x00, 0x01, b'a', b'x']));
        assert!(matches!(ready.await, Ok(Ok(()))));
    }

    // Scenario 5 surfaced through `Client::connect`'s future: an
    // authentication-class CONNACK resolves the first-connect receiver with
    // an error instead of leaving the caller no way to learn the attempt
    // failed.
    #[tokio::test]
    async fn test_auth_refusal_surfaces_on_first_connect_future() {
        let config = ClientConfig::new(addr(), "c1").unwrap();
        let (mut supervisor, _commands, ready) = Supervisor::new(config);

        let mut mock = MockTransport::new();
        let mut connack_bytes = Vec::new();
        Packet::ConnectAck(ConnectAckPacket::new(false, ConnectReturnCode::NotAuthorized))
            .encode(&mut connack_bytes)
            .unwrap();
        mock.push_inbound(&connack_bytes);

        let _ = tokio::time::timeout(Duration::from_millis(50), supervisor.drive(&mut mock)).await;

        match ready.await {
            Ok(Err(ClientError::ConnectionRefused(code))) => {
                assert!(code.is_auth_failure());
            }
            other => panic!("expected auth refusal, got {other:?}"),
        }
    }
}
