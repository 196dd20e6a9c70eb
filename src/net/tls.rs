//! TLS certificate loading.

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use std::path::Path;

use crate::config::schema::TlsConfig;

fn require_file(kind: &str, path: &Path) -> io::Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} file not found: {}", kind, path.display()),
        ))
    }
}

/// Load the listener's PEM certificate chain and private key.
pub async fn load_tls_config(tls: &TlsConfig) -> io::Result<RustlsConfig> {
    let cert_path = Path::new(&tls.cert_path);
    let key_path = Path::new(&tls.key_path);
    require_file("Certificate", cert_path)?;
    require_file("Private key", key_path)?;

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(cert = %tls.cert_path, "TLS certificate loaded");
    Ok(config)
}
