// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Utilities for X.509 operations: a pool of trusted certificates, path
//! validation from a leaf up to a trusted root, and helpers for working with
//! PEM bundles and certificate names.

use der::{
    asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef},
    Any, DecodePem, Encode, Error as DerError,
};
use sha2::{Digest, Sha256};
use std::collections::{hash_map::Entry, HashMap};
use x509_cert::{
    ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier},
    name::Name,
    Certificate,
};
use x509_verify::VerifyingKey;

const PEM_CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

/// Unix timestamp, measured since the epoch (January 1, 1970, 00:00),
/// ignoring leap seconds, in milliseconds.
pub type UnixTimestamp = u64;

/// Returns the current time as a [`UnixTimestamp`].
pub fn now_millis() -> UnixTimestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Returns the SHA-256 fingerprint of the DER encoding of a certificate.
///
/// # Errors
///
/// Returns an error if the certificate cannot be DER-encoded.
pub fn fingerprint(cert: &Certificate) -> Result<[u8; 32], DerError> {
    Ok(Sha256::digest(cert.to_der()?).into())
}

/// A `CertPool` is a set of certificates, indexed for parent lookups.
#[derive(Default)]
pub struct CertPool {
    // Map from SHA256 fingerprint to index in `certs`.
    by_fingerprint: HashMap<[u8; 32], usize>,
    // Map from subject name to list of indexes of certs with that name.
    by_name: HashMap<String, Vec<usize>>,
    // Map from SKI to list of indexes of certs with that SKI.
    by_subject_key_id: HashMap<Vec<u8>, Vec<usize>>,
    // List of certificates in pool.
    pub certs: Vec<Certificate>,
}

impl CertPool {
    /// Constructs a `CertPool` from the given certificates, weeding out
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate
    /// extensions.
    pub fn new(certs: Vec<Certificate>) -> Result<Self, DerError> {
        let mut pool = Self::default();
        for cert in certs {
            pool.add_cert(cert)?;
        }
        Ok(pool)
    }

    /// Number of distinct certificates in the pool.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Search the certificate pool for potential parents for the provided certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate extensions.
    pub fn find_potential_parents(&self, cert: &Certificate) -> Result<&[usize], DerError> {
        if let Some((_, aki)) = cert.tbs_certificate.get::<AuthorityKeyIdentifier>()? {
            if let Some(key_id) = aki.key_identifier {
                if let Some(indexes) = self.by_subject_key_id.get(key_id.as_bytes()) {
                    return Ok(indexes);
                }
            }
        }
        if let Some(indexes) = self.by_name.get(&cert.tbs_certificate.issuer.to_string()) {
            return Ok(indexes);
        }
        Ok(&[])
    }

    /// Add a certificate to the certificate pool if it is not already included.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate or
    /// parsing its extensions.
    pub fn add_cert(&mut self, cert: Certificate) -> Result<(), DerError> {
        let fingerprint = fingerprint(&cert)?;
        let ski = cert
            .tbs_certificate
            .get::<SubjectKeyIdentifier>()?
            .map(|(_, ski)| ski.0.as_bytes().to_vec());
        if let Entry::Vacant(e) = self.by_fingerprint.entry(fingerprint) {
            let idx = self.certs.len();
            e.insert(idx);
            self.by_name
                .entry(cert.tbs_certificate.subject.to_string())
                .or_default()
                .push(idx);
            if let Some(ski) = ski {
                self.by_subject_key_id.entry(ski).or_default().push(idx);
            }
            self.certs.push(cert);
        }

        Ok(())
    }

    /// Add a single PEM encoded certificate to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly one well-formed
    /// certificate.
    pub fn append_cert_from_pem(&mut self, input: &str) -> Result<(), DerError> {
        let cert = Certificate::from_pem(input.trim().as_bytes())?;
        self.add_cert(cert)
    }

    /// Add every certificate found in a PEM bundle. A block that fails to
    /// parse is skipped rather than aborting the import.
    ///
    /// Returns the number of blocks that were skipped alongside each error.
    pub fn append_certs_from_pem_lossy(&mut self, input: &str) -> Vec<(usize, DerError)> {
        let mut skipped = Vec::new();
        for (i, block) in split_pem_certificates(input).iter().enumerate() {
            if let Err(e) = self.append_cert_from_pem(block) {
                skipped.push((i, e));
            }
        }
        skipped
    }

    /// Check if the pool includes a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate.
    pub fn includes(&self, cert: &Certificate) -> Result<bool, DerError> {
        Ok(self.by_fingerprint.contains_key(&fingerprint(cert)?))
    }
}

/// Splits a PEM bundle into one PEM string per certificate. Anything outside
/// of `CERTIFICATE` blocks is ignored.
pub fn split_pem_certificates(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in input.lines().map(str::trim) {
        if line == PEM_CERTIFICATE_BEGIN {
            current = Some(format!("{line}\n"));
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
            if line == PEM_CERTIFICATE_END {
                blocks.extend(current.take());
            }
        }
    }
    blocks
}

/// Wraps a base64 DER certificate (as found in a JWK `x5c` entry) with PEM
/// framing.
pub fn der_base64_to_pem(der_base64: &str) -> String {
    let body: String = der_base64.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = String::with_capacity(body.len() + 64);
    pem.push_str(PEM_CERTIFICATE_BEGIN);
    pem.push('\n');
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(PEM_CERTIFICATE_END);
    pem.push('\n');
    pem
}

/// Returns the first common name (CN) attribute of a distinguished name.
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == const_oid::db::rfc4519::CN)
        .and_then(|atv| directory_string(&atv.value))
}

fn directory_string(value: &Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<Ia5StringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    None
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error("empty chain")]
    EmptyChain,
    #[error("certificate {subject} is not valid at {at}")]
    OutsideValidityWindow { subject: String, at: UnixTimestamp },
    #[error("invalid link in chain")]
    InvalidLinkInChain,
    #[error("missing or invalid basic constraints")]
    InvalidBasicConstraints,
    #[error("issuer not in root store: {to_verify_issuer}")]
    NoPathToTrustedRoot { to_verify_issuer: String },
    #[error("mismatching signature algorithm identifier")]
    MismatchingSigAlg,
}

/// Where a validated chain meets the trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustAnchor {
    /// The certificate at this position of the submitted chain is itself a
    /// trusted root.
    InChain(usize),
    /// The last used certificate of the submitted chain is signed by the root
    /// at this index of the pool.
    Pool(usize),
}

/// A successfully validated certification path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustPath {
    /// Number of certificates of the submitted chain that form the path,
    /// starting at the leaf.
    pub used: usize,
    pub anchor: TrustAnchor,
}

/// Validates a certificate chain, starting from the leaf, against a pool of
/// trusted roots. The following checks are performed:
///
/// 1. Each certificate in the chain signs the previous certificate.
/// 2. Each certificate in the chain is well-formed, meaning the signature
///    algorithm used to sign it matches the signature algorithm field in the
///    `TBSCertificate`.
/// 3. Every issuing certificate has a `BasicConstraints` extension with
///    `ca = true`, and path length constraints are met.
/// 4. Every certificate on the path, including the trusted root, is within its
///    validity window at `at`.
/// 5. A cert in the chain is a trusted root or is signed by a trusted root.
///    Validation stops as soon as a path to a trusted root is found, so a chain
///    that carries its own root (or trailing cross-signs) is accepted.
///
/// # Errors
///
/// Returns a [`ValidationError`] describing the first failed check.
pub fn validate_chain(
    chain: &[Certificate],
    roots: &CertPool,
    at: UnixTimestamp,
) -> Result<TrustPath, ValidationError> {
    let (leaf, intermediates) = chain.split_first().ok_or(ValidationError::EmptyChain)?;

    check_well_formedness(leaf)?;
    check_validity_window(leaf, at)?;

    let mut current_cert = leaf;
    for (i, intermediate) in intermediates.iter().enumerate() {
        if let Some(anchor) = find_path_to_root(current_cert, roots, i, at)? {
            return Ok(TrustPath {
                used: i + 1,
                anchor: anchor.at(i),
            });
        }

        check_well_formedness(intermediate)?;
        check_validity_window(intermediate, at)?;

        // Check basic constraints for the intermediate, passing in the number
        // of preceding intermediates in the chain (excluding the leaf).
        check_ca_basic_constraints(intermediate, i)?;

        if !is_link_valid(current_cert, intermediate) {
            return Err(ValidationError::InvalidLinkInChain);
        }
        current_cert = intermediate;
    }

    match find_path_to_root(current_cert, roots, intermediates.len(), at)? {
        Some(anchor) => Ok(TrustPath {
            used: chain.len(),
            anchor: anchor.at(intermediates.len()),
        }),
        None => Err(ValidationError::NoPathToTrustedRoot {
            to_verify_issuer: current_cert.tbs_certificate.issuer.to_string(),
        }),
    }
}

enum PathToRoot {
    IsRoot,
    SignedByRoot(usize),
}

impl PathToRoot {
    fn at(self, chain_idx: usize) -> TrustAnchor {
        match self {
            PathToRoot::IsRoot => TrustAnchor::InChain(chain_idx),
            PathToRoot::SignedByRoot(pool_idx) => TrustAnchor::Pool(pool_idx),
        }
    }
}

/// Check for a path from the provided certificate to a trusted root. This can
/// be the case if the cert itself is a trusted root, or if the certificate is
/// signed by a trusted root that is currently valid.
///
/// * `num_intermediates` - The number of intermediate certs preceding the cert
///   in the chain. This is used for checking the path length basic constraint.
fn find_path_to_root(
    cert: &Certificate,
    roots: &CertPool,
    num_intermediates: usize,
    at: UnixTimestamp,
) -> Result<Option<PathToRoot>, ValidationError> {
    if roots.includes(cert)? {
        return Ok(Some(PathToRoot::IsRoot));
    }

    if let Some(&found_idx) = roots
        .find_potential_parents(cert)?
        .iter()
        .find(|&&roots_idx| {
            let root = &roots.certs[roots_idx];
            is_link_valid(cert, root)
                && check_ca_basic_constraints(root, num_intermediates).is_ok()
                && check_validity_window(root, at).is_ok()
        })
    {
        return Ok(Some(PathToRoot::SignedByRoot(found_idx)));
    }

    Ok(None)
}

/// Verify that a cert is well-formed according to RFC 5280.
fn check_well_formedness(cert: &Certificate) -> Result<(), ValidationError> {
    if cert.signature_algorithm != cert.tbs_certificate.signature {
        return Err(ValidationError::MismatchingSigAlg);
    }
    Ok(())
}

fn check_validity_window(cert: &Certificate, at: UnixTimestamp) -> Result<(), ValidationError> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_unix_duration().as_millis();
    let not_after = validity.not_after.to_unix_duration().as_millis();
    if !(not_before..=not_after).contains(&u128::from(at)) {
        return Err(ValidationError::OutsideValidityWindow {
            subject: cert.tbs_certificate.subject.to_string(),
            at,
        });
    }
    Ok(())
}

/// Returns whether `issuer` carries a valid signature over `child`.
///
/// Links are located by comparing the string forms of the child's issuer and
/// the parent's subject (or by key identifier), which is laxer than a
/// byte-by-byte name comparison; the signature check is what decides.
fn is_link_valid(child: &Certificate, issuer: &Certificate) -> bool {
    if let Ok(key) = VerifyingKey::try_from(issuer) {
        key.verify_strict(child).is_ok()
    } else {
        false
    }
}

/// Validate Basic Constraints for a CA certificate.
///
/// * `num_intermediates` - The number of intermediate certs preceding the cert
///   in the chain. This is used for checking the path length basic constraint.
fn check_ca_basic_constraints(
    ca_cert: &Certificate,
    num_intermediates: usize,
) -> Result<(), ValidationError> {
    if ca_cert
        .tbs_certificate
        .get::<BasicConstraints>()?
        .is_none_or(|(_, bc)| {
            // The path length constraint gives the maximum number of
            // intermediate certificates that can follow this certificate in
            // a valid certification path, not counting the end-entity.
            if bc
                .path_len_constraint
                .is_some_and(|max| num_intermediates > (max as usize))
            {
                return true;
            }
            !bc.ca
        })
    {
        return Err(ValidationError::InvalidBasicConstraints);
    }
    Ok(())
}
