// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Certificate chain validation for signatures made with a server key.
//!
//! A [`CertificateChainValidator`] owns a trust store of root certificates.
//! The store is configured up front and then only read: verification takes
//! `&self`, so a populated validator can be shared between threads, but
//! adding roots while verifications are in flight is not supported.

use crate::{
    jwk::Jwk,
    keys::KeyHandle,
    model::{KeyName, ProtectedHeaders, VerifiedAddress, VerifiedAddressSignature},
    PayIdError,
};
use der::{DecodePem, Encode};
use std::path::{Path, PathBuf};
use x509_cert::Certificate;
use x509_util::{CertPool, UnixTimestamp};

/// Environment variable naming a PEM bundle to use as the system roots.
pub const SSL_CERT_FILE: &str = "SSL_CERT_FILE";

// Well-known locations of the platform root bundle.
const SYSTEM_BUNDLE_PATHS: [&str; 5] = [
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
];

#[derive(Default)]
pub struct CertificateChainValidator {
    roots: CertPool,
    verification_time: Option<UnixTimestamp>,
}

impl CertificateChainValidator {
    /// Creates a validator seeded with the platform's root bundle. Roots that
    /// fail to parse are skipped. If no bundle is found the trust store
    /// starts out empty.
    pub fn new() -> Self {
        Self::from_system_bundle(None)
    }

    /// Creates a validator with an empty trust store.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a validator seeded from `bundle`, or from the platform bundle
    /// when `None`.
    pub fn from_system_bundle(bundle: Option<&Path>) -> Self {
        let mut validator = Self::empty();
        let Some(path) = bundle.map(Path::to_path_buf).or_else(system_bundle_path) else {
            log::warn!("No system root certificate bundle found");
            return validator;
        };
        match std::fs::read_to_string(&path) {
            Ok(pem) => {
                let added = validator.add_root_certificates_from_pem(&pem);
                log::info!(
                    "Imported {added} root certificates from {}",
                    path.display()
                );
            }
            Err(e) => log::warn!("Failed to read root bundle {}: {e}", path.display()),
        }
        validator
    }

    /// Pins the instant at which certificate validity windows are evaluated,
    /// in milliseconds since the epoch. Defaults to the current time.
    #[must_use]
    pub fn with_verification_time(mut self, at: UnixTimestamp) -> Self {
        self.verification_time = Some(at);
        self
    }

    pub fn roots(&self) -> &CertPool {
        &self.roots
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Adds a trusted root certificate.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::CertificateParse`] if `pem` is not a single
    /// well-formed PEM certificate.
    pub fn add_root_certificate(&mut self, pem: &str) -> Result<(), PayIdError> {
        self.roots
            .append_cert_from_pem(pem)
            .map_err(|e| PayIdError::CertificateParse(e.to_string()))
    }

    /// Adds every certificate of a PEM file as a trusted root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, holds no certificate, or
    /// holds a malformed one.
    pub fn add_root_certificate_file(&mut self, path: impl AsRef<Path>) -> Result<(), PayIdError> {
        let path = path.as_ref();
        let blocks = split_certificates(&std::fs::read_to_string(path)?);
        if blocks.is_empty() {
            return Err(PayIdError::CertificateParse(format!(
                "no certificate in {}",
                path.display()
            )));
        }
        for block in &blocks {
            self.add_root_certificate(block)?;
        }
        Ok(())
    }

    /// Bulk-imports roots from a PEM bundle, skipping certificates that fail
    /// to parse. Returns the number of roots added.
    pub fn add_root_certificates_from_pem(&mut self, bundle: &str) -> usize {
        let before = self.roots.len();
        for (i, e) in self.roots.append_certs_from_pem_lossy(bundle) {
            log::warn!("Skipping unsupported root certificate #{i}: {e}");
        }
        self.roots.len() - before
    }

    fn verification_time(&self) -> UnixTimestamp {
        self.verification_time
            .unwrap_or_else(x509_util::now_millis)
    }

    /// Validates a chain, leaf first, against the trust store. An empty
    /// chain, or any validation error, yields `false`.
    pub fn verify_chain(&self, chain: &[Certificate]) -> bool {
        if chain.is_empty() {
            return false;
        }
        match x509_util::validate_chain(chain, &self.roots, self.verification_time()) {
            Ok(path) => {
                log::debug!("Certificate chain trusted via {:?}", path.anchor);
                true
            }
            Err(e) => {
                log::debug!("Certificate chain rejected: {e}");
                false
            }
        }
    }

    /// Checks the certificate chain carried by a signature. Signatures that
    /// are not made with a server key carry no chain and pass. A server key
    /// must match the leaf certificate's public key.
    pub fn verify_chain_for_signature(&self, signature: &VerifiedAddressSignature) -> bool {
        match ProtectedHeaders::decode(&signature.protected) {
            Ok(headers) => self.verify_chain_for_headers(&headers),
            Err(e) => {
                log::debug!("Cannot check certificate chain: {e}");
                false
            }
        }
    }

    pub(crate) fn verify_chain_for_headers(&self, headers: &ProtectedHeaders) -> bool {
        if headers.name != KeyName::ServerKey {
            return true;
        }
        let chain = match extract_x5c_certificates(headers) {
            Ok(chain) => chain,
            Err(e) => {
                log::debug!("Cannot check certificate chain: {e}");
                return false;
            }
        };
        if !leaf_matches_key(&chain, &headers.jwk) {
            log::debug!("Server key does not match the leaf certificate");
            return false;
        }
        self.verify_chain(&chain)
    }

    /// Checks the chains of every signature of a verified address.
    pub fn verify_chains_for_signatures(&self, verified_address: &VerifiedAddress) -> bool {
        verified_address
            .signatures
            .iter()
            .all(|signature| self.verify_chain_for_signature(signature))
    }
}

fn system_bundle_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(SSL_CERT_FILE) {
        return Some(PathBuf::from(path));
    }
    SYSTEM_BUNDLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Splits a PEM bundle into single-certificate PEM blocks.
pub fn split_certificates(pem: &str) -> Vec<String> {
    x509_util::split_pem_certificates(pem)
}

/// Decodes the `x5c` chain of a protected header, leaf first.
///
/// # Errors
///
/// Returns [`PayIdError::MissingCertificateChain`] if the key has no `x5c`
/// entries and [`PayIdError::CertificateParse`] if one is malformed.
pub fn extract_x5c_certificates(headers: &ProtectedHeaders) -> Result<Vec<Certificate>, PayIdError> {
    let x5c = headers
        .jwk
        .x5c
        .as_deref()
        .filter(|x5c| !x5c.is_empty())
        .ok_or(PayIdError::MissingCertificateChain)?;
    x5c.iter()
        .map(|entry| {
            Certificate::from_pem(x509_util::der_base64_to_pem(entry))
                .map_err(|e| PayIdError::CertificateParse(e.to_string()))
        })
        .collect()
}

// Whether the leaf certificate certifies `jwk`. Without this, any valid chain
// could be paired with an arbitrary key.
pub(crate) fn leaf_matches_key(chain: &[Certificate], jwk: &Jwk) -> bool {
    let Some(leaf) = chain.first() else {
        return false;
    };
    let leaf_thumbprint = leaf
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| PayIdError::CertificateParse(e.to_string()))
        .and_then(|spki| KeyHandle::from_public_key_der(&spki))
        .and_then(|key| key.to_public_only())
        .and_then(|leaf_jwk| leaf_jwk.thumbprint());
    match (leaf_thumbprint, jwk.thumbprint()) {
        (Ok(leaf), Ok(key)) => leaf == key,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentInformation;
    use base64::prelude::*;

    const ROOT: &str = include_str!("../tests/root.pem");
    const INTERMEDIATE: &str = include_str!("../tests/interm.pem");
    const SERVER: &str = include_str!("../tests/server.pem");
    const FULLCHAIN: &str = include_str!("../tests/server.fullchain.pem");
    const ROGUE_ROOT: &str = include_str!("../tests/rogue-root.pem");
    const SIGNED: &str = include_str!("../tests/signed-payid.json");
    const ROGUE_SIGNED: &str = include_str!("../tests/rogue-signed-payid.json");

    // 2030-01-01T00:00:00Z
    const AT: UnixTimestamp = 1_893_456_000_000;

    fn validator(roots: &[&str]) -> CertificateChainValidator {
        let mut validator = CertificateChainValidator::empty().with_verification_time(AT);
        for root in roots {
            validator.add_root_certificate(root).unwrap();
        }
        validator
    }

    fn certs(pem: &str) -> Vec<Certificate> {
        split_certificates(pem)
            .iter()
            .map(|block| Certificate::from_pem(block).unwrap())
            .collect()
    }

    fn signatures(json: &str) -> Vec<VerifiedAddressSignature> {
        PaymentInformation::from_json(json).unwrap().verified_addresses[0]
            .signatures
            .clone()
    }

    #[test]
    fn test_empty_chain_is_not_trusted() {
        assert!(!validator(&[ROOT]).verify_chain(&[]));
    }

    #[test]
    fn test_empty_trust_store() {
        let validator = validator(&[]);
        assert_eq!(validator.root_count(), 0);
        assert!(!validator.verify_chain(&certs(FULLCHAIN)));
    }

    #[test]
    fn test_verify_chain() {
        assert!(validator(&[ROOT]).verify_chain(&certs(FULLCHAIN)));
        assert!(validator(&[INTERMEDIATE]).verify_chain(&certs(SERVER)));
        assert!(!validator(&[ROOT]).verify_chain(&certs(SERVER)));
        assert!(!validator(&[ROGUE_ROOT]).verify_chain(&certs(FULLCHAIN)));
    }

    #[test]
    fn test_verification_time() {
        // 2130-01-01T00:00:00Z, after every fixture has expired.
        let validator = validator(&[ROOT]).with_verification_time(5_049_129_600_000);
        assert!(!validator.verify_chain(&certs(FULLCHAIN)));
    }

    #[test]
    fn test_add_root_certificate_rejects_garbage() {
        let mut validator = CertificateChainValidator::empty();
        assert!(matches!(
            validator.add_root_certificate("not a certificate"),
            Err(PayIdError::CertificateParse(_))
        ));
        assert_eq!(validator.root_count(), 0);
    }

    #[test]
    fn test_bulk_import_skips_bad_roots() {
        let garbage = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let bundle = format!("{ROOT}{garbage}{ROGUE_ROOT}{ROOT}");
        let mut validator = CertificateChainValidator::empty();
        assert_eq!(validator.add_root_certificates_from_pem(&bundle), 2);
        assert_eq!(validator.root_count(), 2);
    }

    #[test]
    fn test_root_certificate_file() {
        let mut validator = CertificateChainValidator::empty().with_verification_time(AT);
        validator
            .add_root_certificate_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/root.pem"))
            .unwrap();
        assert!(validator.verify_chain(&certs(FULLCHAIN)));

        assert!(matches!(
            validator.add_root_certificate_file(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/identity-p256.key"
            )),
            Err(PayIdError::CertificateParse(_))
        ));
        assert!(matches!(
            validator.add_root_certificate_file("/nonexistent/roots.pem"),
            Err(PayIdError::Io(_))
        ));
    }

    #[test]
    fn test_from_system_bundle() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/server.fullchain.pem"));
        let validator = CertificateChainValidator::from_system_bundle(Some(path));
        assert_eq!(validator.root_count(), 2);

        let missing = CertificateChainValidator::from_system_bundle(Some(Path::new(
            "/nonexistent/bundle.pem",
        )));
        assert_eq!(missing.root_count(), 0);
    }

    #[test]
    fn test_verify_chain_for_signature() {
        let sigs = signatures(SIGNED);
        let trusted = validator(&[ROOT]);
        let untrusted = validator(&[]);

        // Server key.
        assert!(trusted.verify_chain_for_signature(&sigs[0]));
        assert!(!untrusted.verify_chain_for_signature(&sigs[0]));

        // Identity keys carry no chain.
        assert!(trusted.verify_chain_for_signature(&sigs[1]));
        assert!(untrusted.verify_chain_for_signature(&sigs[1]));
    }

    #[test]
    fn test_rogue_chain_is_not_trusted() {
        let sigs = signatures(ROGUE_SIGNED);
        assert!(!validator(&[ROOT]).verify_chain_for_signature(&sigs[0]));
        assert!(validator(&[ROGUE_ROOT]).verify_chain_for_signature(&sigs[0]));
    }

    #[test]
    fn test_verify_chains_for_signatures() {
        let info = PaymentInformation::from_json(SIGNED).unwrap();
        let address = &info.verified_addresses[0];
        assert!(validator(&[ROOT]).verify_chains_for_signatures(address));
        assert!(!validator(&[ROGUE_ROOT]).verify_chains_for_signatures(address));
    }

    #[test]
    fn test_server_key_must_match_leaf() {
        let sigs = signatures(SIGNED);
        let mut headers = ProtectedHeaders::decode(&sigs[0].protected).unwrap();
        let identity = ProtectedHeaders::decode(&sigs[1].protected).unwrap();
        headers.jwk.x = identity.jwk.x;
        headers.jwk.y = identity.jwk.y;
        let forged = VerifiedAddressSignature {
            protected: headers.encode().unwrap(),
            signature: sigs[0].signature.clone(),
        };
        assert!(!validator(&[ROOT]).verify_chain_for_signature(&forged));
    }

    #[test]
    fn test_server_key_without_chain() {
        let sigs = signatures(SIGNED);
        let mut headers = ProtectedHeaders::decode(&sigs[0].protected).unwrap();
        headers.jwk.x5c = None;
        assert!(matches!(
            extract_x5c_certificates(&headers),
            Err(PayIdError::MissingCertificateChain)
        ));
        let stripped = VerifiedAddressSignature {
            protected: headers.encode().unwrap(),
            signature: sigs[0].signature.clone(),
        };
        assert!(!validator(&[ROOT]).verify_chain_for_signature(&stripped));
    }

    #[test]
    fn test_malformed_header() {
        let sig = VerifiedAddressSignature {
            protected: BASE64_URL_SAFE_NO_PAD.encode("{}"),
            signature: String::new(),
        };
        assert!(!validator(&[ROOT]).verify_chain_for_signature(&sig));
    }

    #[test]
    fn test_extract_x5c_certificates() {
        let headers = ProtectedHeaders::decode(&signatures(SIGNED)[0].protected).unwrap();
        let chain = extract_x5c_certificates(&headers).unwrap();
        assert_eq!(chain, certs(FULLCHAIN));
        assert!(leaf_matches_key(&chain, &headers.jwk));
    }
}
