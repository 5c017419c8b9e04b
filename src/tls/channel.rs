use crate::tls::engine::SessionEngine;
use rustls::{Certificate, ServerSession, Session, Stream};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// An encrypted stream over one accepted connection.
///
/// Owns the raw connection and the [`SessionEngine`] created for it. The handshake runs on the
/// first read or write, or explicitly through [`SecureChannel::complete_handshake`].
///
/// # Example
///
/// Basic usage:
///
/// ```ignore
/// let (mut channel, peer_addr) = server.accept()?.unwrap();
/// channel.complete_handshake()?;
///
/// let mut buf = [0u8; 1024];
/// let n = channel.read(&mut buf)?;
/// channel.write_all(&buf[..n])?;
/// ```
pub struct SecureChannel<S> {
    engine: SessionEngine,
    socket: S,
}

impl<S> SecureChannel<S> {
    /// Wrap a raw connection and the session engine that secures it.
    pub fn new(socket: S, engine: SessionEngine) -> Self {
        Self { engine, socket }
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SessionEngine {
        &mut self.engine
    }

    /// Get a reference to the raw connection.
    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    /// Get mutable access to the raw connection. Reading or writing through it corrupts the
    /// TLS session.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Consume the [`SecureChannel`] to get back the raw connection and the session engine
    pub fn into_parts(self) -> (S, SessionEngine) {
        (self.socket, self.engine)
    }

    /// The certificate chain the client presented, if any.
    pub fn peer_certificates(&self) -> Option<Vec<Certificate>> {
        self.engine.session().get_peer_certificates()
    }

    /// The ALPN protocol agreed during the handshake.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.engine.session().get_alpn_protocol()
    }
}

impl<S: Read + Write> SecureChannel<S> {
    fn stream(&mut self) -> Stream<'_, ServerSession, S> {
        Stream::new(self.engine.session_mut(), &mut self.socket)
    }

    /// Drive the TLS handshake to completion.
    ///
    /// Fails if the peer aborts the handshake or is rejected by the client authentication policy.
    pub fn complete_handshake(&mut self) -> io::Result<()> {
        let session = self.engine.session_mut();

        while session.is_handshaking() {
            session.complete_io(&mut self.socket)?;
        }

        if session.wants_write() {
            session.complete_io(&mut self.socket)?;
        }

        Ok(())
    }

    /// Send a `close_notify` alert to the peer and flush it.
    pub fn close_notify(&mut self) -> io::Result<()> {
        let session = self.engine.session_mut();
        session.send_close_notify();

        while session.wants_write() {
            session.write_tls(&mut self.socket)?;
        }

        self.socket.flush()
    }
}

impl SecureChannel<TcpStream> {
    /// Get the peer IP address and port
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Get the local IP address and port
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send `close_notify` and shut down both halves of the connection.
    pub fn shutdown(&mut self) -> io::Result<()> {
        self.close_notify()?;
        self.socket.shutdown(Shutdown::Both)
    }
}

impl<S: Read + Write> Read for SecureChannel<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream().read(buf)
    }
}

impl<S: Read + Write> Write for SecureChannel<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream().flush()
    }
}

impl<S: fmt::Debug> fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("socket", &self.socket)
            .field("client_auth", &self.engine.client_auth())
            .field("handshaking", &self.engine.is_handshaking())
            .finish()
    }
}
