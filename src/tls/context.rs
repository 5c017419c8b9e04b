use crate::tls::engine::{ClientAuth, SessionEngine};
use anyhow::Context;
use log::*;
use rustls::{
    AllowAnyAnonymousOrAuthenticatedClient, AllowAnyAuthenticatedClient, Certificate, NoClientAuth,
    PrivateKey, ProtocolVersion, RootCertStore, ServerConfig, ServerSession,
};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Server-side TLS configuration that produces a fresh [`SessionEngine`] per connection.
///
/// Holds the server certificate chain and key, and optionally the trust roots used to verify
/// client certificates. One [`ServerConfig`] is prepared for every [`ClientAuth`] level the
/// context can serve, so connections at the same level share a session cache.
///
/// # Example
///
/// Basic usage:
///
/// ```ignore
/// let context = TlsContext::from_pem_files("server.pem", "server.key", Some(Path::new("ca.pem")))?;
/// let engine = context.create_engine(ClientAuth::Required)?;
/// ```
pub struct TlsContext {
    no_client_auth: Arc<ServerConfig>,
    optional_client_auth: Option<Arc<ServerConfig>>,
    required_client_auth: Option<Arc<ServerConfig>>,
}

impl TlsContext {
    /// Creates a [`TlsContextBuilder`] for the given certificate chain and private key.
    pub fn builder(cert_chain: Vec<Certificate>, key: PrivateKey) -> TlsContextBuilder {
        TlsContextBuilder {
            cert_chain,
            key,
            client_roots: Vec::new(),
            alpn_protocols: Vec::new(),
            versions: None,
        }
    }

    /// Creates a [`TlsContext`] from PEM files.
    ///
    /// `client_ca_path` names the trust roots for client certificates; without it the context can
    /// only serve [`ClientAuth::None`].
    pub fn from_pem_files<P: AsRef<Path>, K: AsRef<Path>>(
        cert_path: P,
        key_path: K,
        client_ca_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let mut builder = Self::builder(
            load_certificates(cert_path.as_ref())?,
            load_private_key(key_path.as_ref())?,
        );

        if let Some(ca_path) = client_ca_path {
            builder = builder.client_roots(load_certificates(ca_path)?);
        }

        builder.build()
    }

    /// Whether the context has trust roots for verifying client certificates.
    pub fn supports_client_auth(&self) -> bool {
        self.required_client_auth.is_some()
    }

    /// The prepared `rustls` configuration for a client authentication level.
    pub fn server_config(&self, client_auth: ClientAuth) -> Option<&Arc<ServerConfig>> {
        match client_auth {
            ClientAuth::None => Some(&self.no_client_auth),
            ClientAuth::Optional => self.optional_client_auth.as_ref(),
            ClientAuth::Required => self.required_client_auth.as_ref(),
        }
    }

    /// Creates a new server-mode session engine at the given client authentication level.
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] when client authentication is requested but the
    /// context has no client trust roots.
    pub fn create_engine(&self, client_auth: ClientAuth) -> io::Result<SessionEngine> {
        let config = self.server_config(client_auth).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "client authentication {:?} requested but no client trust roots are configured",
                    client_auth
                ),
            )
        })?;

        Ok(SessionEngine::new(ServerSession::new(config), client_auth))
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("supports_client_auth", &self.supports_client_auth())
            .field("alpn_protocols", &self.no_client_auth.alpn_protocols)
            .field("versions", &self.no_client_auth.versions)
            .finish()
    }
}

/// Builder for a [`TlsContext`].
pub struct TlsContextBuilder {
    cert_chain: Vec<Certificate>,
    key: PrivateKey,
    client_roots: Vec<Certificate>,
    alpn_protocols: Vec<Vec<u8>>,
    versions: Option<Vec<ProtocolVersion>>,
}

impl TlsContextBuilder {
    /// Trust roots used to verify client certificates.
    pub fn client_roots(mut self, roots: Vec<Certificate>) -> Self {
        self.client_roots = roots;
        self
    }

    /// ALPN protocols offered to clients, most preferred first.
    pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Restrict the TLS protocol versions. Defaults to TLS 1.3 and TLS 1.2.
    pub fn protocol_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Build the [`TlsContext`].
    ///
    /// Fails if the certificate chain or protocol version list is empty, a client root cannot be
    /// parsed, or `rustls` rejects the private key.
    pub fn build(self) -> anyhow::Result<TlsContext> {
        if self.cert_chain.is_empty() {
            anyhow::bail!("server certificate chain is empty");
        }

        if let Some(versions) = &self.versions {
            if versions.is_empty() {
                anyhow::bail!("no TLS protocol versions enabled");
            }
        }

        let no_client_auth = self.configure(ServerConfig::new(NoClientAuth::new()))?;

        let (optional_client_auth, required_client_auth) = if self.client_roots.is_empty() {
            debug!("Configured TLS context without client certificate verification");
            (None, None)
        } else {
            let roots = self.root_store()?;
            debug!(
                "Configured TLS context with {} client trust root(s)",
                roots.len()
            );

            (
                Some(self.configure(ServerConfig::new(
                    AllowAnyAnonymousOrAuthenticatedClient::new(roots.clone()),
                ))?),
                Some(self.configure(ServerConfig::new(
                    AllowAnyAuthenticatedClient::new(roots),
                ))?),
            )
        };

        Ok(TlsContext {
            no_client_auth,
            optional_client_auth,
            required_client_auth,
        })
    }

    fn configure(&self, mut config: ServerConfig) -> anyhow::Result<Arc<ServerConfig>> {
        config
            .set_single_cert(self.cert_chain.clone(), self.key.clone())
            .context("could not configure server certificate")?;
        config.set_protocols(&self.alpn_protocols);

        if let Some(versions) = &self.versions {
            config.versions = versions.clone();
        }

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> anyhow::Result<RootCertStore> {
        let mut roots = RootCertStore::empty();

        for cert in &self.client_roots {
            roots
                .add(cert)
                .map_err(|e| anyhow::anyhow!("invalid client trust root: {}", e))?;
        }

        Ok(roots)
    }
}

/// Load all certificates from a PEM file.
pub fn load_certificates(path: &Path) -> anyhow::Result<Vec<Certificate>> {
    let file = File::open(path)
        .with_context(|| format!("could not open certificate file {}", path.display()))?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .with_context(|| format!("could not read certificates from {}", path.display()))?;

    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }

    debug!("Loaded {} certificate(s) from {}", certs.len(), path.display());
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load the first PKCS#8 or PKCS#1 private key from a PEM file.
pub fn load_private_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let file = File::open(path)
        .with_context(|| format!("could not open private key file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .with_context(|| format!("could not read private key from {}", path.display()))?;

        match item {
            Some(rustls_pemfile::Item::PKCS8Key(key)) => {
                debug!("Loaded PKCS#8 private key from {}", path.display());
                return Ok(PrivateKey(key));
            }

            Some(rustls_pemfile::Item::RSAKey(key)) => {
                debug!("Loaded PKCS#1 RSA private key from {}", path.display());
                return Ok(PrivateKey(key));
            }

            Some(rustls_pemfile::Item::ECKey(_)) => {
                warn!(
                    "Skipping SEC1 EC private key in {}, convert it to PKCS#8",
                    path.display()
                );
            }

            Some(_) => continue,

            None => break,
        }
    }

    anyhow::bail!("no private key found in {}", path.display())
}
