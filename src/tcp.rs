//! TCP listener and client adapters
//!
//! Implements the engine's [`Listener`]/[`Connection`] contracts on top of
//! `std::net`. Everything is non-blocking: `try_accept` returns immediately
//! and client reads are probe-then-read so the session loop keeps control of
//! its own timing.

use log::{info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use crate::net::Listener;
use crate::session::Connection;

/// A rebindable TCP listener holding at most one bound socket.
pub struct TcpAcceptor {
    inner: Option<TcpListener>,
    low_latency: bool,
}

impl TcpAcceptor {
    pub fn new() -> Self {
        Self {
            inner: None,
            low_latency: false,
        }
    }

    /// Port actually bound, useful when binding port 0.
    pub fn local_port(&self) -> Option<u16> {
        self.inner
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }
}

impl Default for TcpAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for TcpAcceptor {
    type Conn = TcpClient;

    fn bind(&mut self, port: u16, low_latency: bool) -> bool {
        // Release any previous socket before creating the next one.
        self.inner = None;
        self.low_latency = low_latency;
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                if let Err(err) = listener.set_nonblocking(true) {
                    warn!("failed to set listener non-blocking: {}", err);
                    return false;
                }
                info!("TCP server listening on port {}", port);
                self.inner = Some(listener);
                true
            }
            Err(err) => {
                warn!("failed to bind port {}: {}", port, err);
                false
            }
        }
    }

    fn unbind(&mut self) {
        self.inner = None;
    }

    fn is_listening(&self) -> bool {
        match &self.inner {
            Some(listener) => matches!(listener.take_error(), Ok(None)),
            None => false,
        }
    }

    fn try_accept(&mut self) -> Option<TcpClient> {
        let listener = self.inner.as_ref()?;
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!("client {}: failed to set non-blocking: {}", peer, err);
                    return None;
                }
                if self.low_latency {
                    let _ = stream.set_nodelay(true);
                }
                info!("client connected: {}", peer);
                Some(TcpClient { stream, peer, eof: false })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("accept failed: {}", err);
                None
            }
        }
    }
}

/// One accepted client. Readable through [`Connection`] for the session
/// handler; writable through [`io::Write`] for application replies.
pub struct TcpClient {
    stream: TcpStream,
    peer: SocketAddr,
    eof: bool,
}

impl TcpClient {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpClient {
    fn is_connected(&mut self) -> bool {
        !self.eof
    }

    fn byte_available(&mut self) -> bool {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => {
                self.eof = true;
                false
            }
            Ok(_) => true,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
            Err(err) => {
                warn!("client {}: {}", self.peer, err);
                self.eof = true;
                false
            }
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                self.eof = true;
                None
            }
            Ok(_) => Some(buf[0]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("client {}: read failed: {}", self.peer, err);
                self.eof = true;
                None
            }
        }
    }

    fn flush_and_close(&mut self) {
        let _ = self.stream.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
        self.eof = true;
    }
}

impl Write for TcpClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
