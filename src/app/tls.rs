use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Name of the identity file looked up next to the document root.
const CERT_FILE: &str = "ssl_cert.pem";

#[derive(Clone)]
pub struct TlsState {
    pub acceptor: Option<tokio_native_tls::TlsAcceptor>,
}

/// Resolve the certificate relative to the document root's parent and build
/// an acceptor. When the file is missing, TLS is silently disabled by
/// rewriting the ports option in place: the `s` markers are dropped and
/// those ports are served plain.
pub fn init_tls(config: &mut Config) -> Result<TlsState, Box<dyn std::error::Error>> {
    if !config.general.ports.to_lowercase().contains('s') {
        return Ok(TlsState { acceptor: None });
    }

    let cert_path = cert_path(&config.general.document_root);
    if !cert_path.is_file() {
        warn!(
            "No {} next to the document root; serving TLS ports as plain HTTP",
            cert_path.display()
        );
        config.general.ports = config.general.ports.replace(['s', 'S'], "");
        return Ok(TlsState { acceptor: None });
    }

    info!("Loading TLS identity from {}", cert_path.display());
    let pem = std::fs::read(&cert_path)?;
    // The identity file carries both the certificate and its key.
    let identity = native_tls::Identity::from_pkcs8(&pem, &pem)?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;
    Ok(TlsState {
        acceptor: Some(tokio_native_tls::TlsAcceptor::from(acceptor)),
    })
}

fn cert_path(document_root: &str) -> PathBuf {
    let root = Path::new(document_root);
    root.parent().unwrap_or(root).join(CERT_FILE)
}
