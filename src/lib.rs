//! This crate provides a TLS adapter over plain listening socket channels, so that every accepted
//! connection becomes an encrypted channel.
//!
//! # Why?
//! Servers that already manage a plain listening socket (binding, socket options, blocking mode,
//! readiness registration) shouldn't have to rewrite that plumbing to accept TLS connections. By
//! wrapping the plain channel, the adapter keeps every listening operation as-is and only changes
//! what `accept` hands back.
//!
//! # Layout
//! - [`channel`] defines the [`ServerChannel`] operation surface and [`AdaptableChannel`].
//! - [`tcp`] implements the plain channel as [`TcpServerChannel`].
//! - [`tls`] implements the adapter as [`SecureServerChannel`](tls::SecureServerChannel), together
//!   with the [`TlsContext`](tls::TlsContext) that creates per-connection session engines.
//!
//! # Examples
//! Please use the demos provided in the repository to help understand crate usage.

pub mod channel;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;

pub use crate::channel::{AdaptableChannel, OptionValue, ServerChannel, SocketOption};
pub use crate::tcp::{IpFamily, TcpServerChannel};
