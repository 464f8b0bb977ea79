//! rustls client configuration from [`TlsOptions`]
//!
//! Trust comes from the bundled webpki roots, or only from `--cacert` when
//! given. Certificate pins are checked after normal chain verification; with
//! `-k` the chain check is skipped but pins still apply.

use std::sync::Arc;

use bytes::Bytes;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{Fingerprint, TlsOptions, TlsVersion};
use crate::error::ExecutionError;

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// PEM bytes already loaded from the paths in [`TlsOptions`].
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub ca_pem: Option<Bytes>,
    pub cert_pem: Option<Bytes>,
    pub key_pem: Option<Bytes>,
}

fn tls_error(reason: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::TlsConfig {
        reason: reason.to_string(),
    }
}

/// Build the client config. `alpn` lists protocols in preference order.
pub fn client_config(
    options: &TlsOptions,
    material: &TlsMaterial,
    alpn: Vec<Vec<u8>>,
) -> Result<ClientConfig, ExecutionError> {
    let base = crypto::ring::default_provider();
    let cipher_suites = select_ciphers(&base.cipher_suites, &options.ciphers)?;
    let provider = Arc::new(CryptoProvider {
        cipher_suites,
        ..base
    });

    let versions = match options.min_version {
        Some(TlsVersion::Tls13) => TLS13_ONLY,
        _ => rustls::ALL_VERSIONS,
    };

    let verifier = PinnedVerifier::new(root_store(material)?, options, provider.clone())?;
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)
        .map_err(tls_error)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let mut config = match client_identity(material)? {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(tls_error)?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn;
    debug!(
        insecure = options.insecure,
        pins = options.pinned.len(),
        custom_ca = material.ca_pem.is_some(),
        "built TLS client config"
    );
    Ok(config)
}

fn select_ciphers(
    available: &[rustls::SupportedCipherSuite],
    wanted: &[String],
) -> Result<Vec<rustls::SupportedCipherSuite>, ExecutionError> {
    if wanted.is_empty() {
        return Ok(available.to_vec());
    }
    let selected: Vec<_> = wanted
        .iter()
        .filter_map(|name| {
            available
                .iter()
                .find(|suite| format!("{:?}", suite.suite()).eq_ignore_ascii_case(name))
                .copied()
        })
        .collect();
    if selected.is_empty() {
        return Err(tls_error("none of the requested ciphers are supported"));
    }
    Ok(selected)
}

fn root_store(material: &TlsMaterial) -> Result<RootCertStore, ExecutionError> {
    let mut roots = RootCertStore::empty();
    match &material.ca_pem {
        Some(pem) => {
            let mut reader: &[u8] = pem.as_ref();
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| tls_error(format!("invalid CA bundle: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| tls_error(format!("unusable CA certificate: {e}")))?;
            }
            if roots.is_empty() {
                return Err(tls_error("CA bundle contains no certificates"));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn client_identity(material: &TlsMaterial) -> Result<Option<Identity>, ExecutionError> {
    let Some(cert_pem) = &material.cert_pem else {
        if material.key_pem.is_some() {
            return Err(tls_error("--key given without --cert"));
        }
        return Ok(None);
    };

    let mut reader: &[u8] = cert_pem.as_ref();
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("invalid client certificate: {e}")))?;
    if chain.is_empty() {
        return Err(tls_error("client certificate file contains no certificates"));
    }

    let key_source = material.key_pem.as_ref().unwrap_or(cert_pem);
    let mut reader: &[u8] = key_source.as_ref();
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(format!("invalid client key: {e}")))?
        .ok_or_else(|| tls_error("no private key found for the client certificate"))?;
    Ok(Some((chain, key)))
}

/// Whether `cert` matches one of `pins`. An empty pin set matches everything.
pub fn matches_pins(cert: &[u8], pins: &[Fingerprint]) -> bool {
    if pins.is_empty() {
        return true;
    }
    let digest: [u8; 32] = Sha256::digest(cert).into();
    pins.iter().any(|pin| pin.as_bytes() == &digest)
}

#[derive(Debug)]
struct PinnedVerifier {
    /// `None` with `-k`
    chain: Option<Arc<WebPkiServerVerifier>>,
    pins: Vec<Fingerprint>,
    provider: Arc<CryptoProvider>,
}

impl PinnedVerifier {
    fn new(
        roots: RootCertStore,
        options: &TlsOptions,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ExecutionError> {
        let chain = if options.insecure {
            None
        } else {
            Some(
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(tls_error)?,
            )
        };
        Ok(Self {
            chain,
            pins: options.pinned.clone(),
            provider,
        })
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(chain) = &self.chain {
            chain.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }
        if !matches_pins(end_entity.as_ref(), &self.pins) {
            return Err(rustls::Error::General(
                "server certificate does not match any pinned fingerprint".to_string(),
            ));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
