//! HTTPS connector construction.
//!
//! OS root certificates are loaded once per process and reused by every
//! client built afterwards.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static OS_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn os_roots() -> &'static [CertificateDer<'static>] {
    OS_ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }
        tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
        loaded.certs
    })
}

/// Installed process-wide provider if there is one, aws-lc-rs otherwise.
/// Never installs a global default.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn os_roots_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = os_roots();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if added == 0 {
        return Err(HttpError::Tls(
            format!("none of the {ignored} native root certificates could be parsed").into(),
        ));
    }
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }

    Ok(rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Build the connector for the hyper client.
///
/// Plain `http` is only dialed under `TransportSecurity::AllowInsecureHttp`.
/// ALPN advertises both h2 and http/1.1.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the provider rejects the protocol versions or,
/// for `TlsRootConfig::Native`, if the OS store yields no usable roots.
pub(crate) fn https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let with_roots = match roots {
        TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => HttpsConnectorBuilder::new().with_tls_config(os_roots_config()?),
    };

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => {
            with_roots.https_or_http().enable_all_versions().build()
        }
        TransportSecurity::TlsOnly => with_roots.https_only().enable_all_versions().build(),
    };
    Ok(connector)
}
