use crate::channel::{AdaptableChannel, OptionValue, ServerChannel, SocketOption};
use crate::tcp::TcpServerChannel;
use crate::tls::{ClientAuth, SecureChannel, TlsContext};
use log::*;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

/// Listens on a plain channel and upgrades every accepted connection to a [`SecureChannel`].
///
/// Every forwarding operation of [`ServerChannel`] goes straight to the wrapped plain channel, so
/// a [`SecureServerChannel`] can stand in wherever the plain channel is used. Only `accept`
/// differs: it pairs each raw connection with a fresh server-mode [`SessionEngine`] from the
/// [`TlsContext`].
///
/// The client authentication flags are read when a connection is accepted. Changing them needs
/// `&mut self`, so they cannot change during an `accept`; share the channel across threads behind
/// a lock if the flags must be updated while another thread accepts.
///
/// [`SessionEngine`]: crate::tls::SessionEngine
///
/// # Example
///
/// Basic usage:
///
/// ```ignore
/// let context = Arc::new(TlsContext::from_pem_files("server.pem", "server.key", None)?);
/// let server = SecureServerChannel::listen("127.0.0.1:3456", context)?;
///
/// while let Some((mut channel, peer_addr)) = server.accept()? {
///     // do something with the secure channel
/// }
/// ```
pub struct SecureServerChannel<C> {
    channel: C,
    context: Arc<TlsContext>,
    want_client_auth: bool,
    need_client_auth: bool,
}

impl<C> SecureServerChannel<C> {
    /// Wraps a plain listening channel. Performs no I/O.
    pub fn new(channel: C, context: Arc<TlsContext>) -> Self {
        Self {
            channel,
            context,
            want_client_auth: false,
            need_client_auth: false,
        }
    }

    /// Creates a [`SecureServerChannelBuilder`] around a plain listening channel.
    pub fn builder(channel: C) -> SecureServerChannelBuilder<C> {
        SecureServerChannelBuilder {
            channel,
            context: None,
            want_client_auth: false,
            need_client_auth: false,
        }
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }

    /// Whether client authentication is requested from connections accepted from now on.
    pub fn want_client_auth(&self) -> bool {
        self.want_client_auth
    }

    /// Request, without requiring, client certificates on connections accepted from now on.
    pub fn set_want_client_auth(&mut self, want: bool) {
        self.want_client_auth = want;
    }

    /// Whether client authentication is required from connections accepted from now on.
    pub fn need_client_auth(&self) -> bool {
        self.need_client_auth
    }

    /// Require client certificates on connections accepted from now on. Takes precedence over
    /// [`set_want_client_auth`](SecureServerChannel::set_want_client_auth).
    pub fn set_need_client_auth(&mut self, need: bool) {
        self.need_client_auth = need;
    }

    /// The level the next accepted connection will be configured with.
    pub fn client_auth(&self) -> ClientAuth {
        ClientAuth::from_flags(self.want_client_auth, self.need_client_auth)
    }

    /// Get mutable access to the wrapped plain channel.
    pub fn adaptee_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Consume the [`SecureServerChannel`] to get back the wrapped plain channel.
    pub fn into_adaptee(self) -> C {
        self.channel
    }
}

impl SecureServerChannel<TcpServerChannel> {
    /// Creates a [`SecureServerChannel`] by binding a plain TCP channel to an IP address and port.
    ///
    /// # Example
    ///
    /// Basic usage:
    ///
    /// ```ignore
    /// let server = SecureServerChannel::listen("127.0.0.1:3456", context)?;
    /// ```
    pub fn listen<A: ToSocketAddrs + fmt::Display>(
        ip_addrs: A,
        context: Arc<TlsContext>,
    ) -> anyhow::Result<Self> {
        let channel = TcpServerChannel::listen(ip_addrs)?;
        if let Some(addr) = channel.local_addr()? {
            info!("Started TLS server at {}", addr);
        }

        Ok(Self::new(channel, context))
    }
}

impl<C: ServerChannel> ServerChannel for SecureServerChannel<C> {
    type Stream = SecureChannel<C::Stream>;
    type Socket = C::Socket;

    fn socket(&self) -> io::Result<&C::Socket> {
        self.channel.socket()
    }

    /// Accepts the next connection from the plain channel and wraps it in a [`SecureChannel`].
    ///
    /// `Ok(None)` and errors from the plain channel are passed through unchanged. If no session
    /// engine can be created, the raw connection is dropped, which closes it, and the error is
    /// returned.
    fn accept(&self) -> io::Result<Option<(SecureChannel<C::Stream>, SocketAddr)>> {
        let (stream, peer_addr) = match self.channel.accept()? {
            Some(accepted) => accepted,
            None => return Ok(None),
        };

        let client_auth = self.client_auth();

        match self.context.create_engine(client_auth) {
            Ok(engine) => {
                debug!(
                    "Upgrading connection from {} to TLS with client auth {:?}",
                    peer_addr, client_auth
                );
                Ok(Some((SecureChannel::new(stream, engine), peer_addr)))
            }

            Err(e) => {
                warn!(
                    "Could not create TLS session for connection from {}: {}",
                    peer_addr, e
                );
                drop(stream);
                Err(e)
            }
        }
    }

    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<()> {
        self.channel.bind(addr, backlog)
    }

    fn set_option(&mut self, option: SocketOption, value: OptionValue) -> io::Result<()> {
        self.channel.set_option(option, value)
    }

    fn option(&self, option: SocketOption) -> io::Result<OptionValue> {
        self.channel.option(option)
    }

    fn supported_options(&self) -> &'static [SocketOption] {
        self.channel.supported_options()
    }

    fn local_addr(&self) -> io::Result<Option<SocketAddr>> {
        self.channel.local_addr()
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.channel.set_blocking(blocking)
    }

    fn is_blocking(&self) -> bool {
        self.channel.is_blocking()
    }

    fn close(&mut self) -> io::Result<()> {
        self.channel.close()
    }

    fn is_open(&self) -> bool {
        self.channel.is_open()
    }
}

impl<C> AdaptableChannel for SecureServerChannel<C> {
    type Adaptee = C;

    fn adaptee(&self) -> &C {
        &self.channel
    }
}

impl<C: fmt::Display> fmt::Display for SecureServerChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureServerChannel[{}]", self.channel)
    }
}

impl<C: fmt::Debug> fmt::Debug for SecureServerChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureServerChannel")
            .field("channel", &self.channel)
            .field("context", &self.context)
            .field("want_client_auth", &self.want_client_auth)
            .field("need_client_auth", &self.need_client_auth)
            .finish()
    }
}

/// Builder for a [`SecureServerChannel`].
pub struct SecureServerChannelBuilder<C> {
    channel: C,
    context: Option<Arc<TlsContext>>,
    want_client_auth: bool,
    need_client_auth: bool,
}

impl<C> SecureServerChannelBuilder<C> {
    pub fn context(mut self, context: Arc<TlsContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn want_client_auth(mut self, want: bool) -> Self {
        self.want_client_auth = want;
        self
    }

    pub fn need_client_auth(mut self, need: bool) -> Self {
        self.need_client_auth = need;
        self
    }

    /// Build the [`SecureServerChannel`].
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] when no [`TlsContext`] was given. The plain
    /// channel is dropped in that case.
    pub fn build(self) -> io::Result<SecureServerChannel<C>> {
        let context = self.context.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "a TLS context is required")
        })?;

        Ok(SecureServerChannel {
            channel: self.channel,
            context,
            want_client_auth: self.want_client_auth,
            need_client_auth: self.need_client_auth,
        })
    }
}
