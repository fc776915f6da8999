//! Builds tonic TLS configurations from `DistributedTlsConfig`, honoring
//! the precedence spelled out for the distributed runtime: `external_tls`
//! disables app-level TLS entirely; else `enabled` turns on TLS (mTLS when
//! `ca_file` is set); else plaintext.

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::{DistributedTlsConfig, is_non_production};
use crate::distributed::TransportError;

/// What transport posture a node should take, derived once from config.
pub enum Posture {
    /// No app-level TLS; either plaintext or delegated to an external mesh.
    Plaintext,
    /// App-level TLS (optionally mutual) should be configured.
    Tls,
}

fn posture(config: &DistributedTlsConfig) -> Posture {
    if config.external_tls {
        Posture::Plaintext
    } else if config.enabled {
        Posture::Tls
    } else {
        Posture::Plaintext
    }
}

async fn read(path: &str) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| TransportError::Tls(format!("reading {path}: {e}")))
}

/// Builds the server-side TLS config, or `None` for plaintext/external-TLS.
pub async fn configure_server(
    config: &DistributedTlsConfig,
) -> Result<Option<ServerTlsConfig>, TransportError> {
    if !matches!(posture(config), Posture::Tls) {
        return Ok(None);
    }

    let cert_path = config
        .cert_file
        .as_deref()
        .ok_or_else(|| TransportError::Tls("tls enabled but cert_file is unset".to_string()))?;
    let key_path = config
        .key_file
        .as_deref()
        .ok_or_else(|| TransportError::Tls("tls enabled but key_file is unset".to_string()))?;

    let cert = read(cert_path).await?;
    let key = read(key_path).await?;
    let identity = Identity::from_pem(cert, key);

    let mut tls = ServerTlsConfig::new().identity(identity);

    if let Some(ca_path) = &config.ca_file {
        let ca = read(ca_path).await?;
        tls = tls.client_ca_root(Certificate::from_pem(ca));
    }

    Ok(Some(tls))
}

/// Builds the client-side TLS config, or `None` for plaintext/external-TLS.
pub async fn configure_client(
    config: &DistributedTlsConfig,
    environment: Option<&str>,
) -> Result<Option<ClientTlsConfig>, TransportError> {
    if !matches!(posture(config), Posture::Tls) {
        return Ok(None);
    }

    if config.insecure_skip_verify && !is_non_production(environment) {
        return Err(TransportError::Tls(
            "insecure_skip_verify is refused outside the non-production allow-list".to_string(),
        ));
    }

    let mut tls = ClientTlsConfig::new();

    if let Some(server_name) = &config.server_name {
        tls = tls.domain_name(server_name);
    }

    if let Some(ca_path) = &config.ca_file {
        let ca = read(ca_path).await?;
        tls = tls.ca_certificate(Certificate::from_pem(ca));
    }

    if let (Some(cert_path), Some(key_path)) = (&config.cert_file, &config.key_file) {
        let cert = read(cert_path).await?;
        let key = read(key_path).await?;
        tls = tls.identity(Identity::from_pem(cert, key));
    }

    Ok(Some(tls))
}
