//! TLS upgrade for HTTPS connections.

use crate::client::BoxedIoStream;
use std::net::TcpStream;
use tr_core::DriveError;
use tr_core::DriveResult;

#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::ClientConnection;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::StreamOwned;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Upgrades `stream` to TLS, verifying `host` against the WebPKI roots.
#[cfg(feature = "tls-rustls")]
pub(crate) fn connect_tls(mut stream: TcpStream, host: &str) -> DriveResult<BoxedIoStream> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| {
            DriveError::new(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let server_name = ServerName::try_from(host.to_owned()).map_err(|error| {
        DriveError::new(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{host}`: {error}"),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), server_name).map_err(|error| {
        DriveError::new(
            "net.tls.connection_init_failed",
            format!("failed to initialize TLS connection for `{host}`: {error}"),
        )
    })?;

    connection.complete_io(&mut stream).map_err(|error| {
        DriveError::new(
            "net.fetch.network_failure",
            format!("TLS handshake failed for `{host}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(not(feature = "tls-rustls"))]
pub(crate) fn connect_tls(_stream: TcpStream, host: &str) -> DriveResult<BoxedIoStream> {
    Err(DriveError::new(
        "net.tls.backend_unavailable",
        format!("cannot reach `{host}`: rustls backend is disabled; enable `tr-net/tls-rustls`"),
    ))
}
