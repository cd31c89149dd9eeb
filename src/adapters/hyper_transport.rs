use std::{error::Error as StdError, io};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::Version;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls::RootCertStore;
use rustls_native_certs::load_native_certs;

use crate::{
    error::{Error, Result},
    ports::{Request, Response, RoundTripper, TransportError, TransportResult},
};

/// Default round-tripper: Hyper with Rustls (HTTP/1.1 over plain or TLS).
///
/// Roots come from the platform store plus an optional PEM bundle. Timeouts,
/// retries and connection selection are handled above this layer.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HyperTransport {
    /// Create a transport trusting the platform roots.
    pub fn new() -> Result<Self> {
        Self::with_ca_cert(None)
    }

    /// Create a transport that also trusts the certificates in `ca_pem`.
    pub fn with_ca_cert(ca_pem: Option<&[u8]>) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = native_roots();
        if let Some(pem) = ca_pem {
            let added = add_pem_certs(&mut root_cert_store, pem)?;
            tracing::debug!("Added {} CA certificates to the TLS root store", added);
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self { client })
    }
}

fn native_roots() -> RootCertStore {
    let mut root_cert_store = RootCertStore::empty();
    let native_certs = load_native_certs();

    for cert in native_certs.certs {
        if root_cert_store.add(cert).is_err() {
            tracing::warn!("Failed to add native certificate to rustls RootCertStore");
        }
    }

    if !native_certs.errors.is_empty() {
        tracing::warn!(
            "Some native certificates failed to load: {:?}",
            native_certs.errors
        );
    }

    root_cert_store
}

/// Parse every certificate in `pem` into `store`.
fn add_pem_certs(store: &mut RootCertStore, pem: &[u8]) -> Result<usize> {
    let mut reader = pem;
    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert
            .map_err(|e| Error::Configuration(format!("unable to parse CA certificate: {e}")))?;
        store
            .add(cert)
            .map_err(|e| Error::Configuration(format!("unable to add CA certificate: {e}")))?;
        added += 1;
    }

    if added == 0 {
        return Err(Error::Configuration(
            "unable to add CA certificate: no certificates found".to_string(),
        ));
    }
    Ok(added)
}

/// Map a client error onto the retry classes of [`TransportError`].
fn classify(err: &hyper_util::client::legacy::Error) -> TransportError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return TransportError::from_io(io_err);
        }
        if let Some(hyper_err) = current.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return TransportError::UnexpectedEof;
            }
            if hyper_err.is_timeout() {
                return TransportError::Timeout(hyper_err.to_string());
            }
        }
        source = current.source();
    }
    TransportError::Connection(err.to_string())
}

#[async_trait]
impl RoundTripper for HyperTransport {
    async fn round_trip(&self, req: Request) -> TransportResult<Response> {
        if req.uri().host().is_none() {
            return Err(TransportError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        tracing::trace!("Sending request: {} {}", method, uri);

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (parts, incoming) = response.into_parts();
                Ok(Response::from_parts(parts, AxumBody::new(incoming)))
            }
            Err(e) => {
                let err = classify(&e);
                tracing::debug!("Request {} {} failed: {}", method, uri, err);
                Err(err)
            }
        }
    }
}
