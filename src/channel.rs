//! The operation surface shared by plain and secure listening channels.
//!
//! <br/>
//!
//! [`ServerChannel`] is implemented by the plain TCP transport
//! ([`TcpServerChannel`](crate::tcp::TcpServerChannel)) and by the TLS adapter wrapping it, so code
//! written against the trait can use either interchangeably.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Socket options understood by listening channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// `SO_REUSEADDR`, takes an [`OptionValue::Bool`]
    ReuseAddress,
    /// `SO_REUSEPORT`, takes an [`OptionValue::Bool`]
    ReusePort,
    /// `SO_RCVBUF`, takes an [`OptionValue::Size`]
    ReceiveBufferSize,
    /// `IP_TTL` (`IPV6_UNICAST_HOPS` on IPv6 channels), takes an [`OptionValue::U32`]
    Ttl,
    /// `IPV6_V6ONLY`, takes an [`OptionValue::Bool`]. Only IPv6 channels support it.
    OnlyV6,
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketOption::ReuseAddress => "SO_REUSEADDR",
            SocketOption::ReusePort => "SO_REUSEPORT",
            SocketOption::ReceiveBufferSize => "SO_RCVBUF",
            SocketOption::Ttl => "IP_TTL",
            SocketOption::OnlyV6 => "IPV6_V6ONLY",
        };

        f.write_str(name)
    }
}

/// The value of a [`SocketOption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Size(usize),
    U32(u32),
}

impl OptionValue {
    pub(crate) fn as_bool(self, option: SocketOption) -> io::Result<bool> {
        match self {
            OptionValue::Bool(value) => Ok(value),
            other => Err(mismatched_value(option, other)),
        }
    }

    pub(crate) fn as_size(self, option: SocketOption) -> io::Result<usize> {
        match self {
            OptionValue::Size(value) => Ok(value),
            other => Err(mismatched_value(option, other)),
        }
    }

    pub(crate) fn as_u32(self, option: SocketOption) -> io::Result<u32> {
        match self {
            OptionValue::U32(value) => Ok(value),
            other => Err(mismatched_value(option, other)),
        }
    }
}

/// A channel that listens on a socket and accepts incoming connections.
///
/// Mirrors the operation set of a standard server socket channel. A channel starts out open and
/// moves to closed on [`close`](ServerChannel::close); once closed, every operation other than
/// `close` and `is_open` fails with an [`io::ErrorKind::NotConnected`] error.
pub trait ServerChannel {
    /// The connection type produced by [`accept`](ServerChannel::accept)
    type Stream;

    /// The socket this channel listens on
    type Socket;

    /// Get a view of the underlying socket.
    fn socket(&self) -> io::Result<&Self::Socket>;

    /// Accept the next incoming connection.
    ///
    /// Blocks until a connection is pending when the channel is in blocking mode. In non-blocking
    /// mode, returns `Ok(None)` when no connection is pending.
    fn accept(&self) -> io::Result<Option<(Self::Stream, SocketAddr)>>;

    /// Bind the channel to a local address and start listening.
    ///
    /// A `backlog` of `0` selects the implementation's default.
    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<()>;

    /// Set the value of a socket option.
    fn set_option(&mut self, option: SocketOption, value: OptionValue) -> io::Result<()>;

    /// Get the value of a socket option.
    fn option(&self, option: SocketOption) -> io::Result<OptionValue>;

    /// The socket options this channel supports.
    fn supported_options(&self) -> &'static [SocketOption];

    /// Get the bound local address, or `None` when the channel is not bound yet.
    fn local_addr(&self) -> io::Result<Option<SocketAddr>>;

    /// Switch the channel between blocking and non-blocking mode.
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// Whether [`accept`](ServerChannel::accept) blocks.
    fn is_blocking(&self) -> bool;

    /// Close the channel. Closing an already closed channel has no effect.
    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// A channel that wraps another channel (its adaptee) and can hand it out.
///
/// Readiness facilities such as `epoll` only work with the native socket, so an adapter has to
/// expose the channel it wraps for registration while connections are still accepted through
/// the adapter itself.
pub trait AdaptableChannel {
    type Adaptee;

    /// Get a reference to the wrapped channel.
    fn adaptee(&self) -> &Self::Adaptee;
}

/// Error for any operation other than `close` on a closed channel.
pub fn closed_channel() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

pub(crate) fn not_yet_bound() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "channel is not bound")
}

pub(crate) fn already_bound() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "channel is already bound")
}

pub(crate) fn unsupported_option(option: SocketOption) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("socket option {} is not supported", option),
    )
}

fn mismatched_value(option: SocketOption, value: OptionValue) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid value {:?} for socket option {}", value, option),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_value_matches_option_type() {
        assert_eq!(
            OptionValue::Bool(true)
                .as_bool(SocketOption::ReuseAddress)
                .unwrap(),
            true
        );
        assert_eq!(
            OptionValue::Size(4096)
                .as_size(SocketOption::ReceiveBufferSize)
                .unwrap(),
            4096
        );
        assert_eq!(OptionValue::U32(64).as_u32(SocketOption::Ttl).unwrap(), 64);
    }

    #[test]
    fn mismatched_option_value_is_invalid_input() {
        let err = OptionValue::U32(1)
            .as_bool(SocketOption::ReuseAddress)
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("SO_REUSEADDR"));
    }

    #[test]
    fn closed_channel_error_kind() {
        assert_eq!(closed_channel().kind(), io::ErrorKind::NotConnected);
    }
}
