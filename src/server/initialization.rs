// src/server/initialization.rs

//! Handles the complete server initialization process: TLS material, the
//! database pool, the cache connection, and handler registration. Every
//! failure in here is fatal: the server never serves traffic from a
//! partially-initialized state.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::auth::SessionStore;
use crate::core::cache::CacheClient;
use crate::core::db::ConnectionPool;
use crate::core::dispatch::{Dispatcher, Registry};
use crate::core::handlers;
use crate::core::rate_limit::RateLimiter;
use crate::core::state::ServerState;
use anyhow::{Result, anyhow};
use dashmap::DashMap;
use rustls::RootCertStore;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let cache = Arc::new(CacheClient::new(&config.cache));
    cache
        .ping()
        .await
        .map_err(|e| anyhow!("Cache is unreachable at startup: {e}"))?;
    info!(
        "Connected to cache server at {}:{}.",
        config.cache.host, config.cache.port
    );

    let db_pool = ConnectionPool::bootstrap(config.database.clone(), config.database.pool_size)
        .await
        .map_err(|e| anyhow!("Failed to open initial database connections: {e}"))?;
    info!(
        "Database pool ready with {} connections.",
        config.database.pool_size
    );

    let sessions = Arc::new(SessionStore::new(
        cache.clone(),
        config.auth.secret_key.clone(),
        config.auth.session_ttl,
    ));
    let limiter = Arc::new(RateLimiter::new());
    let registry = Registry::new(handlers::builtin(&config, sessions.clone()));
    info!("Registered {} handler units.", registry.len());
    let dispatcher = Dispatcher::new(registry, limiter);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("glossd listening on {}:{}", config.host, config.port);

    let state = Arc::new(ServerState {
        config,
        db_pool,
        cache,
        sessions,
        dispatcher,
        clients: DashMap::new(),
    });

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        acceptor,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    if !config.tls.enabled {
        warn!("TLS is DISABLED. The server will speak plaintext HTTP.");
    }
    if config.tls.local_dev {
        warn!("local_dev is set: self-signed client certificates will be accepted.");
    }
    info!(
        "Session TTL is {}s; database pool size is {}.",
        config.auth.session_ttl.as_secs(),
        config.database.pool_size
    );
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if !config.tls.enabled {
        return Ok(None);
    }

    info!("TLS is enabled. Loading certificate and key.");
    let certs = load_certs(&config.tls.cert_path)?;
    let key = load_key(&config.tls.key_path)?;

    let builder = rustls::ServerConfig::builder();
    let server_config = match &config.tls.client_ca_path {
        Some(ca_path) => {
            let roots = load_root_store(ca_path)?;
            let webpki = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| anyhow!("Failed to build client-certificate verifier: {e}"))?;
            let verifier = Arc::new(LenientClientVerifier {
                inner: webpki,
                allow_self_signed: config.tls.local_dev,
            });
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Loads the trust chain used to verify client certificates.
fn load_root_store(path: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| anyhow!("Invalid certificate in trust chain '{}': {}", path, e))?;
    }
    Ok(roots)
}

/// A client-certificate verifier that delegates to webpki verification but,
/// when `allow_self_signed` is set, admits a leaf certificate whose issuer is
/// unknown. This is the local-development path only; production deployments
/// leave the flag unset and get strict chain verification.
#[derive(Debug)]
struct LenientClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    allow_self_signed: bool,
}

impl ClientCertVerifier for LenientClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.allow_self_signed =>
            {
                debug!("Accepting self-signed client certificate (local_dev)");
                Ok(ClientCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
