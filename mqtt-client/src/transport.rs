// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::config::TransportKind;

/// Duplex byte stream the supervisor's select loop drives, implemented by
/// the real [`Transport`] and by [`mock::MockTransport`] so the select loop
/// itself can run unmodified against an in-memory buffer pair in tests.
pub trait DuplexTransport {
    async fn read_buf(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// The three real transport flavors the supervisor can open: plain TCP,
/// TLS, and WebSocket. Implements [`DuplexTransport`]; the supervisor only
/// ever calls through that trait, never matching on the variant itself.
pub enum Transport {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
}

impl Transport {
    /// # Errors
    /// Returns an I/O error if the TCP connect, TLS handshake or WebSocket
    /// upgrade fails.
    pub async fn connect(address: SocketAddr, kind: &TransportKind) -> io::Result<Self> {
        match kind {
            TransportKind::Tcp => Self::connect_tcp(address).await,
            TransportKind::Tls { domain } => Self::connect_tls(address, domain).await,
            TransportKind::WebSocket { path } => Self::connect_ws(address, path).await,
        }
    }

    async fn connect_tcp(address: SocketAddr) -> io::Result<Self> {
        log::debug!("opening plain tcp transport to {address}");
        let socket = TcpStream::connect(address).await?;
        Ok(Transport::Tcp(socket))
    }

    async fn connect_tls(address: SocketAddr, domain: &str) -> io::Result<Self> {
        log::debug!("opening tls transport to {address} (sni {domain})");
        let mut roots = rustls::RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::ServerName::try_from(domain)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid tls server name"))?;
        let socket = TcpStream::connect(address).await?;
        let stream = connector.connect(server_name, socket).await?;
        Ok(Transport::Tls(Box::new(stream)))
    }

    async fn connect_ws(address: SocketAddr, path: &str) -> io::Result<Self> {
        let url = format!("ws://{address}{path}");
        log::debug!("opening websocket transport to {url}");
        let socket = TcpStream::connect(address).await?;
        let (ws_stream, _response) = tokio_tungstenite::client_async(url, socket)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Transport::Ws(Box::new(ws_stream)))
    }

    /// Append available bytes to `buf`, returning the number of bytes read.
    /// A return value of `0` signals the peer closed the connection.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            Transport::Tcp(socket) => socket.read_buf(buf).await,
            Transport::Tls(stream) => stream.read_buf(buf).await,
            Transport::Ws(ws) => match ws.next().await {
                Some(Ok(msg)) => {
                    let data = msg.into_data();
                    let n = data.len();
                    buf.extend_from_slice(&data);
                    Ok(n)
                }
                Some(Err(e)) => Err(io::Error::new(io::ErrorKind::Other, e)),
                None => Ok(0),
            },
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Transport::Tcp(socket) => socket.write_all(buf).await,
            Transport::Tls(stream) => stream.write_all(buf).await,
            Transport::Ws(ws) => ws
                .send(WsMessage::binary(buf.to_vec()))
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(socket) => socket.flush().await,
            Transport::Tls(stream) => stream.flush().await,
            Transport::Ws(ws) => ws.flush().await.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(socket) => socket.shutdown().await,
            Transport::Tls(stream) => stream.shutdown().await,
            Transport::Ws(ws) => ws
                .close(None)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl DuplexTransport for Transport {
    async fn read_buf(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        Transport::read_buf(self, buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Transport::write_all(self, buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        Transport::flush(self).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Transport::shutdown(self).await
    }
}

/// In-memory mock transport used by supervisor-level tests so no real
/// sockets are opened in `mqtt-client/src/supervisor.rs`'s test module.
pub mod mock {
    use std::collections::VecDeque;
    use std::io;

    use super::DuplexTransport;

    /// A `VecDeque`-backed duplex buffer pair standing in for a real
    /// `Transport`. `inbound` is bytes the test harness queues up as if the
    /// broker had sent them; `outbound` collects what the engine writes.
    #[derive(Default)]
    pub struct MockTransport {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub closed: bool,
    }

    impl MockTransport {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes);
        }
    }

    impl DuplexTransport for MockTransport {
        /// Returns `0` (peer-closed signal) once `closed` is set and the
        /// inbound queue has been drained, so tests can simulate the broker
        /// hanging up after a scripted sequence of bytes.
        async fn read_buf(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            if self.inbound.is_empty() {
                if self.closed {
                    return Ok(0);
                }
                // No bytes queued and not yet closed: yield so the select
                // loop's other branches (maintenance tick, commands) get a
                // turn instead of spinning a read that never completes.
                std::future::pending::<()>().await;
            }
            let n = self.inbound.len();
            buf.extend(self.inbound.drain(..));
            Ok(n)
        }

        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.outbound.extend_from_slice(buf);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
