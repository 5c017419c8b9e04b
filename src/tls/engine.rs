use rustls::{ServerSession, Session};

/// Client authentication level requested by a server-side TLS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientAuth {
    /// The server does not ask for a client certificate
    None,
    /// The server asks for a client certificate but completes the handshake without one
    Optional,
    /// The server rejects the handshake unless the client presents a trusted certificate
    Required,
}

impl ClientAuth {
    /// Resolve the "want" and "need" client authentication flags into a single level.
    ///
    /// "need" takes precedence: when both flags are set the session requires a client
    /// certificate, and only the need property of the resulting engine reports `true`.
    pub fn from_flags(want: bool, need: bool) -> Self {
        if need {
            ClientAuth::Required
        } else if want {
            ClientAuth::Optional
        } else {
            ClientAuth::None
        }
    }

    pub fn is_wanted(self) -> bool {
        self == ClientAuth::Optional
    }

    pub fn is_needed(self) -> bool {
        self == ClientAuth::Required
    }
}

impl Default for ClientAuth {
    fn default() -> Self {
        ClientAuth::None
    }
}

/// A per-connection TLS session engine in server mode.
///
/// Created by [`TlsContext::create_engine`](crate::tls::TlsContext::create_engine) for every
/// accepted connection. The client authentication level is fixed at creation.
#[derive(Debug)]
pub struct SessionEngine {
    session: ServerSession,
    client_auth: ClientAuth,
}

impl SessionEngine {
    pub(crate) fn new(session: ServerSession, client_auth: ClientAuth) -> Self {
        Self {
            session,
            client_auth,
        }
    }

    /// Always `true`: the engine wraps a [`ServerSession`].
    pub fn is_server_mode(&self) -> bool {
        true
    }

    pub fn client_auth(&self) -> ClientAuth {
        self.client_auth
    }

    /// Whether the engine asks for, but does not insist on, a client certificate.
    pub fn want_client_auth(&self) -> bool {
        self.client_auth.is_wanted()
    }

    /// Whether the engine rejects clients that do not present a certificate.
    pub fn need_client_auth(&self) -> bool {
        self.client_auth.is_needed()
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.is_handshaking()
    }

    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ServerSession {
        &mut self.session
    }

    pub fn into_session(self) -> ServerSession {
        self.session
    }
}
