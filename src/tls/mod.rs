//! TLS adapter over plain listening channels.
//!
//! <br/>
//!
//! This module primarily exposes the adapter as [`SecureServerChannel`], which accepts through a
//! plain [`ServerChannel`](crate::channel::ServerChannel) and wraps every connection in a
//! [`SecureChannel`]. Per-connection session engines are produced by a shared [`TlsContext`].
//!

pub(crate) mod channel;
pub(crate) mod context;
pub(crate) mod engine;
pub(crate) mod listener;

pub use channel::*;
pub use context::*;
pub use engine::*;
pub use listener::*;

#[cfg(feature = "tls")]
pub use rustls;

#[cfg(test)]
pub(crate) mod testing {
    use super::TlsContext;
    use rustls::{Certificate, PrivateKey};
    use std::sync::Arc;

    pub(crate) const CA_CERT: &str = include_str!("../../tests/certs/ca.pem");
    pub(crate) const SERVER_CERT: &str = include_str!("../../tests/certs/server.pem");
    pub(crate) const SERVER_KEY: &str = include_str!("../../tests/certs/server.key");

    /// Which client trust roots a test context is built with.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum ContextRoots {
        None,
        Ca,
    }

    pub(crate) fn certificates(pem: &str) -> Vec<Certificate> {
        rustls_pemfile::certs(&mut pem.as_bytes())
            .unwrap()
            .into_iter()
            .map(Certificate)
            .collect()
    }

    pub(crate) fn private_key(pem: &str) -> PrivateKey {
        match rustls_pemfile::read_one(&mut pem.as_bytes()).unwrap() {
            Some(rustls_pemfile::Item::PKCS8Key(key)) => PrivateKey(key),
            other => panic!("expected a PKCS#8 key, got {:?}", other),
        }
    }

    pub(crate) fn server_context(roots: ContextRoots) -> Arc<TlsContext> {
        let mut builder = TlsContext::builder(certificates(SERVER_CERT), private_key(SERVER_KEY));

        if let ContextRoots::Ca = roots {
            builder = builder.client_roots(certificates(CA_CERT));
        }

        Arc::new(builder.build().unwrap())
    }
}
