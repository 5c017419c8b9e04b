use crate::channel::{
    already_bound, closed_channel, not_yet_bound, unsupported_option, OptionValue, ServerChannel,
    SocketOption,
};
use log::*;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

/// Backlog used when [`ServerChannel::bind`] is given a backlog of `0`
pub const DEFAULT_BACKLOG: u32 = 128;

// `OnlyV6` stays last so IPv4 channels can advertise the list without it.
#[cfg(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
))]
const SUPPORTED_OPTIONS: &[SocketOption] = &[
    SocketOption::ReuseAddress,
    SocketOption::ReusePort,
    SocketOption::ReceiveBufferSize,
    SocketOption::Ttl,
    SocketOption::OnlyV6,
];

#[cfg(not(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
)))]
const SUPPORTED_OPTIONS: &[SocketOption] = &[
    SocketOption::ReuseAddress,
    SocketOption::ReceiveBufferSize,
    SocketOption::Ttl,
    SocketOption::OnlyV6,
];

/// Address family of the socket behind a [`TcpServerChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// The family an address belongs to.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => IpFamily::V4,
            SocketAddr::V6(_) => IpFamily::V6,
        }
    }

    fn domain(self) -> Domain {
        match self {
            IpFamily::V4 => Domain::IPV4,
            IpFamily::V6 => Domain::IPV6,
        }
    }
}

/// A plain, non-secure listening channel for incoming TCP connections.
///
/// The channel is created unbound with [`TcpServerChannel::open`] and starts listening once
/// [`bind`](ServerChannel::bind) is called. Accepted connections are handed out as blocking
/// [`TcpStream`]s regardless of the channel's own blocking mode.
///
/// # Example
///
/// Basic usage:
///
/// ```ignore
/// let mut server = TcpServerChannel::listen("127.0.0.1:3456")?;
///
/// while let Some((stream, peer_addr)) = server.accept()? {
///     // handle the connection
/// }
/// ```
#[derive(Debug)]
pub struct TcpServerChannel {
    socket: Option<Socket>,
    family: IpFamily,
    local_addr: Option<SocketAddr>,
    blocking: bool,
}

impl TcpServerChannel {
    /// Creates an open, unbound [`TcpServerChannel`] for the given address family.
    pub fn open(family: IpFamily) -> io::Result<Self> {
        let socket = Socket::new(family.domain(), Type::STREAM, Some(Protocol::TCP))?;

        // same default as `std::net::TcpListener::bind`
        #[cfg(unix)]
        socket.set_reuse_address(true)?;

        Ok(Self {
            socket: Some(socket),
            family,
            local_addr: None,
            blocking: true,
        })
    }

    /// Creates a [`TcpServerChannel`] by binding to an IP address and port with the default
    /// backlog.
    ///
    /// # Example
    ///
    /// Basic usage:
    ///
    /// ```ignore
    /// let mut server = TcpServerChannel::listen("127.0.0.1:3456")?;
    /// ```
    pub fn listen<A: ToSocketAddrs + fmt::Display>(ip_addrs: A) -> anyhow::Result<Self> {
        let mut last_error = None;

        for addr in ip_addrs.to_socket_addrs()? {
            let mut channel = Self::open(IpFamily::of(&addr))?;

            match channel.bind(addr, 0) {
                Ok(()) => return Ok(channel),
                Err(e) => {
                    debug!("Could not bind TCP server to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(anyhow::Error::new(e)),
            None => Err(anyhow::anyhow!("could not resolve any address for {}", ip_addrs)),
        }
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }

    fn open_socket(&self) -> io::Result<&Socket> {
        self.socket.as_ref().ok_or_else(closed_channel)
    }
}

impl ServerChannel for TcpServerChannel {
    type Stream = TcpStream;
    type Socket = Socket;

    fn socket(&self) -> io::Result<&Socket> {
        self.open_socket()
    }

    fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let socket = self.open_socket()?;
        if self.local_addr.is_none() {
            return Err(not_yet_bound());
        }

        match socket.accept() {
            Ok((conn, addr)) => {
                conn.set_nonblocking(false)?;

                let peer_addr = addr.as_socket().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "peer address is not an IP address")
                })?;
                debug!("Received connection attempt from {}", peer_addr);

                Ok(Some((TcpStream::from(conn), peer_addr)))
            }

            Err(e) if e.kind() == io::ErrorKind::WouldBlock && !self.blocking => Ok(None),

            Err(e) => Err(e),
        }
    }

    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<()> {
        let socket = self.open_socket()?;
        if self.local_addr.is_some() {
            return Err(already_bound());
        }

        let backlog = if backlog == 0 { DEFAULT_BACKLOG } else { backlog };

        socket.bind(&addr.into())?;
        socket.listen(backlog.min(i32::MAX as u32) as i32)?;

        let local_addr = socket.local_addr()?.as_socket();
        if let Some(local_addr) = local_addr {
            info!("Started TCP server at {}", local_addr);
        }

        self.local_addr = local_addr;
        Ok(())
    }

    fn set_option(&mut self, option: SocketOption, value: OptionValue) -> io::Result<()> {
        let socket = self.open_socket()?;

        match option {
            SocketOption::ReuseAddress => socket.set_reuse_address(value.as_bool(option)?),
            SocketOption::ReusePort => set_reuse_port(socket, value.as_bool(option)?),
            SocketOption::ReceiveBufferSize => {
                socket.set_recv_buffer_size(value.as_size(option)?)
            }
            SocketOption::Ttl => match self.family {
                IpFamily::V4 => socket.set_ttl(value.as_u32(option)?),
                IpFamily::V6 => socket.set_unicast_hops_v6(value.as_u32(option)?),
            },
            SocketOption::OnlyV6 => match self.family {
                IpFamily::V4 => Err(unsupported_option(option)),
                IpFamily::V6 => socket.set_only_v6(value.as_bool(option)?),
            },
        }
    }

    fn option(&self, option: SocketOption) -> io::Result<OptionValue> {
        let socket = self.open_socket()?;

        Ok(match option {
            SocketOption::ReuseAddress => OptionValue::Bool(socket.reuse_address()?),
            SocketOption::ReusePort => OptionValue::Bool(reuse_port(socket)?),
            SocketOption::ReceiveBufferSize => OptionValue::Size(socket.recv_buffer_size()?),
            SocketOption::Ttl => match self.family {
                IpFamily::V4 => OptionValue::U32(socket.ttl()?),
                IpFamily::V6 => OptionValue::U32(socket.unicast_hops_v6()?),
            },
            SocketOption::OnlyV6 => match self.family {
                IpFamily::V4 => return Err(unsupported_option(option)),
                IpFamily::V6 => OptionValue::Bool(socket.only_v6()?),
            },
        })
    }

    fn supported_options(&self) -> &'static [SocketOption] {
        match self.family {
            IpFamily::V4 => &SUPPORTED_OPTIONS[..SUPPORTED_OPTIONS.len() - 1],
            IpFamily::V6 => SUPPORTED_OPTIONS,
        }
    }

    fn local_addr(&self) -> io::Result<Option<SocketAddr>> {
        self.open_socket()?;
        Ok(self.local_addr)
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.open_socket()?.set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(socket) = self.socket.take() {
            match self.local_addr {
                Some(addr) => info!("Closed TCP server at {}", addr),
                None => debug!("Closed unbound TCP server"),
            }

            drop(socket);
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

impl fmt::Display for TcpServerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.socket, self.local_addr) {
            (None, _) => f.write_str("closed"),
            (Some(_), None) => f.write_str("unbound"),
            (Some(_), Some(addr)) => write!(f, "{}", addr),
        }
    }
}

#[cfg(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
))]
fn set_reuse_port(socket: &Socket, reuse: bool) -> io::Result<()> {
    socket.set_reuse_port(reuse)
}

#[cfg(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
))]
fn reuse_port(socket: &Socket) -> io::Result<bool> {
    socket.reuse_port()
}

#[cfg(not(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
)))]
fn set_reuse_port(_socket: &Socket, _reuse: bool) -> io::Result<()> {
    Err(unsupported_option(SocketOption::ReusePort))
}

#[cfg(not(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
)))]
fn reuse_port(_socket: &Socket) -> io::Result<bool> {
    Err(unsupported_option(SocketOption::ReusePort))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    fn bound_channel() -> TcpServerChannel {
        let mut channel = TcpServerChannel::open(IpFamily::V4).unwrap();
        channel.bind(loopback(), 16).unwrap();
        channel
    }

    #[test]
    fn open_channel_is_unbound_and_blocking() {
        let channel = TcpServerChannel::open(IpFamily::V4).unwrap();

        assert!(channel.is_open());
        assert!(channel.is_blocking());
        assert_eq!(channel.local_addr().unwrap(), None);
        assert_eq!(channel.to_string(), "unbound");
    }

    #[test]
    fn bind_reports_local_address() {
        let channel = bound_channel();
        let addr = channel.local_addr().unwrap().unwrap();

        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
        assert_eq!(channel.to_string(), addr.to_string());
    }

    #[test]
    fn bind_twice_fails() {
        let mut channel = bound_channel();
        let err = channel.bind(loopback(), 0).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn listen_resolves_and_binds() {
        let channel = TcpServerChannel::listen("127.0.0.1:0").unwrap();

        assert!(channel.local_addr().unwrap().is_some());
    }

    #[test]
    fn accept_before_bind_fails() {
        let channel = TcpServerChannel::open(IpFamily::V4).unwrap();
        let err = channel.accept().unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn blocking_accept_returns_connection() {
        let channel = bound_channel();
        let addr = channel.local_addr().unwrap().unwrap();

        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (stream, peer_addr) = channel.accept().unwrap().unwrap();
        let client = client.join().unwrap();

        assert_eq!(peer_addr, client.local_addr().unwrap());
        assert_eq!(stream.local_addr().unwrap(), addr);
    }

    #[test]
    fn non_blocking_accept_without_pending_connection_returns_none() {
        let mut channel = bound_channel();
        channel.set_blocking(false).unwrap();

        assert!(!channel.is_blocking());
        assert!(channel.accept().unwrap().is_none());
    }

    #[test]
    fn options_round_trip_through_socket() {
        let mut channel = TcpServerChannel::open(IpFamily::V4).unwrap();

        channel
            .set_option(SocketOption::ReuseAddress, OptionValue::Bool(false))
            .unwrap();
        assert_eq!(
            channel.option(SocketOption::ReuseAddress).unwrap(),
            OptionValue::Bool(false)
        );

        channel
            .set_option(SocketOption::Ttl, OptionValue::U32(42))
            .unwrap();
        assert_eq!(
            channel.option(SocketOption::Ttl).unwrap(),
            OptionValue::U32(42)
        );
    }

    #[test]
    fn option_with_wrong_value_type_fails() {
        let mut channel = TcpServerChannel::open(IpFamily::V4).unwrap();
        let err = channel
            .set_option(SocketOption::Ttl, OptionValue::Bool(true))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn supported_options_include_reuse_address() {
        let channel = TcpServerChannel::open(IpFamily::V4).unwrap();

        assert!(channel
            .supported_options()
            .contains(&SocketOption::ReuseAddress));
    }

    #[test]
    fn every_advertised_option_is_readable_on_ipv4() {
        let channel = TcpServerChannel::open(IpFamily::V4).unwrap();

        assert!(!channel.supported_options().contains(&SocketOption::OnlyV6));
        for &option in channel.supported_options() {
            assert!(
                channel.option(option).is_ok(),
                "advertised option {} failed",
                option
            );
        }
    }

    #[test]
    fn only_v6_is_unsupported_on_ipv4() {
        let mut channel = TcpServerChannel::open(IpFamily::V4).unwrap();

        assert_eq!(
            channel.option(SocketOption::OnlyV6).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(
            channel
                .set_option(SocketOption::OnlyV6, OptionValue::Bool(true))
                .unwrap_err()
                .kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn every_advertised_option_is_readable_on_ipv6() {
        // hosts without IPv6 cannot open the socket at all
        let mut channel = match TcpServerChannel::open(IpFamily::V6) {
            Ok(channel) => channel,
            Err(_) => return,
        };

        assert_eq!(channel.family(), IpFamily::V6);
        assert!(channel.supported_options().contains(&SocketOption::OnlyV6));
        for &option in channel.supported_options() {
            assert!(
                channel.option(option).is_ok(),
                "advertised option {} failed",
                option
            );
        }

        channel
            .set_option(SocketOption::OnlyV6, OptionValue::Bool(true))
            .unwrap();
        assert_eq!(
            channel.option(SocketOption::OnlyV6).unwrap(),
            OptionValue::Bool(true)
        );

        channel
            .set_option(SocketOption::Ttl, OptionValue::U32(42))
            .unwrap();
        assert_eq!(
            channel.option(SocketOption::Ttl).unwrap(),
            OptionValue::U32(42)
        );
    }

    #[test]
    fn closed_channel_rejects_operations() {
        let mut channel = bound_channel();
        channel.close().unwrap();

        assert!(!channel.is_open());
        assert_eq!(channel.to_string(), "closed");
        assert_eq!(
            channel.accept().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            channel.local_addr().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            channel.set_blocking(false).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(channel.socket().is_err());
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let mut channel = bound_channel();

        channel.close().unwrap();
        channel.close().unwrap();
        assert!(!channel.is_open());
    }
}
