//! Plain TCP transport listener implementation.
//!
//! <br/>
//!
//! This module exposes the non-secure listening channel as [`TcpServerChannel`]. It is the
//! adaptee wrapped by the TLS listener in [`crate::tls`].

pub(crate) mod listener;

pub use listener::*;
