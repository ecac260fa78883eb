use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::Config;

/// TLS for the wire listener, when both a certificate and a key are configured.
pub fn acceptor_from_config(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => Ok(None),
        (Some(cert), Some(key)) => load_acceptor(Path::new(cert), Path::new(key)).map(Some),
        _ => Err(io::Error::new(
            ErrorKind::InvalidInput,
            "both SPACEBOOK_TLS_CERT and SPACEBOOK_TLS_KEY must be set, or neither",
        )),
    }
}

fn load_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("no private key in {}", key_path.display()),
            )
        })?;

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}
