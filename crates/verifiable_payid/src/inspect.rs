// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Structured inspection of a PayID document: per address and per signature,
//! whether the signature verifies and whether its certificate chain is
//! trusted, reported separately, along with key and certificate details.
//!
//! The `is_verified` flags agree with [`crate::verify_pay_id`] using
//! [`crate::ChainCheck::Enforce`] with the same validator.

use crate::{
    chain::{extract_x5c_certificates, CertificateChainValidator},
    jwk::{decode_base64_lenient, Jwk},
    model::{
        Address, KeyName, PaymentInformation, ProtectedHeaders, VerifiedAddress,
        VerifiedAddressSignature,
    },
    verify::{payload_pay_id, verify_signature},
    PayIdError,
};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use x509_cert::{der::DateTime as DerDateTime, time::Time, Certificate};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInformationInspectionResult {
    pub pay_id: String,
    /// All addresses passed verification.
    pub is_verified: bool,
    pub verified_addresses_results: Vec<VerifiedAddressInspectionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedAddressInspectionResult {
    /// The address has signatures, and every one is valid with a trusted
    /// chain.
    pub is_verified: bool,
    /// The signed address, if the payload could be decoded.
    pub address: Option<Address>,
    pub signatures_results: Vec<SignatureInspectionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInspectionResult {
    pub is_signature_valid: bool,
    pub is_chain_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<KeyName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_summary: Option<KeySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_chain_result: Option<CertificateChainInspectionResult>,
    /// Why the signature was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulus_bits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

impl KeySummary {
    pub fn from_jwk(jwk: &Jwk) -> Self {
        Self {
            kty: jwk.kty.clone(),
            curve: jwk.crv.clone(),
            modulus_bits: jwk
                .n
                .as_deref()
                .and_then(|n| decode_base64_lenient(n).ok())
                .map(|n| n.len() * 8),
            thumbprint: jwk.thumbprint().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateChainInspectionResult {
    /// The chain leads to a trusted root and certifies the signing key.
    pub is_chain_valid: bool,
    pub certificate_results: Vec<CertificateInspectionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInspectionResult {
    /// Subject common name.
    pub issued_to: Option<String>,
    /// Issuer common name.
    pub issued_by: Option<String>,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: String,
    pub not_after: String,
    pub sha256_fingerprint: String,
}

impl CertificateInspectionResult {
    pub fn from_certificate(cert: &Certificate) -> Self {
        let tbs = &cert.tbs_certificate;
        Self {
            issued_to: x509_util::common_name(&tbs.subject),
            issued_by: x509_util::common_name(&tbs.issuer),
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial_number: hex::encode(tbs.serial_number.as_bytes()),
            not_before: format_time(&tbs.validity.not_before),
            not_after: format_time(&tbs.validity.not_after),
            sha256_fingerprint: x509_util::fingerprint(cert)
                .map(hex::encode)
                .unwrap_or_default(),
        }
    }
}

fn format_time(time: &Time) -> String {
    let datetime: DerDateTime = time.to_date_time();
    i64::try_from(datetime.unix_duration().as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| datetime.to_string())
}

/// Produces inspection reports using a configured trust store.
pub struct PaymentInformationInspector<'a> {
    validator: &'a CertificateChainValidator,
}

impl<'a> PaymentInformationInspector<'a> {
    pub fn new(validator: &'a CertificateChainValidator) -> Self {
        Self { validator }
    }

    /// Inspects every verified address of `info`.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::MissingPayId`] if the document has no payId.
    pub fn inspect(
        &self,
        info: &PaymentInformation,
    ) -> Result<PaymentInformationInspectionResult, PayIdError> {
        let pay_id = info.pay_id().ok_or(PayIdError::MissingPayId)?;
        let verified_addresses_results: Vec<_> = info
            .verified_addresses
            .iter()
            .map(|address| self.inspect_verified_address(pay_id, address))
            .collect();
        Ok(PaymentInformationInspectionResult {
            pay_id: pay_id.to_owned(),
            is_verified: verified_addresses_results.iter().all(|r| r.is_verified),
            verified_addresses_results,
        })
    }

    fn inspect_verified_address(
        &self,
        pay_id: &str,
        verified_address: &VerifiedAddress,
    ) -> VerifiedAddressInspectionResult {
        let pay_id_matches =
            payload_pay_id(&verified_address.payload).is_some_and(|signed| signed == pay_id);
        let signatures_results: Vec<_> = verified_address
            .signatures
            .iter()
            .map(|signature| {
                let mut result = self.inspect_signature(verified_address, signature);
                if !pay_id_matches && result.is_signature_valid {
                    result.is_signature_valid = false;
                    result.error = Some(format!("payload is not signed for {pay_id}"));
                }
                result
            })
            .collect();
        VerifiedAddressInspectionResult {
            is_verified: !signatures_results.is_empty()
                && signatures_results
                    .iter()
                    .all(|r| r.is_signature_valid && r.is_chain_valid),
            address: verified_address
                .unsigned_address()
                .ok()
                .map(|unsigned| unsigned.pay_id_address),
            signatures_results,
        }
    }

    fn inspect_signature(
        &self,
        verified_address: &VerifiedAddress,
        signature: &VerifiedAddressSignature,
    ) -> SignatureInspectionResult {
        let headers = match ProtectedHeaders::decode(&signature.protected) {
            Ok(headers) => headers,
            Err(e) => {
                return SignatureInspectionResult {
                    is_signature_valid: false,
                    is_chain_valid: false,
                    key_type: None,
                    alg: None,
                    jwk: None,
                    key_summary: None,
                    certificate_chain_result: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let verification = verify_signature(&verified_address.payload, signature);
        let certificate_chain_result = (headers.name == KeyName::ServerKey).then(|| {
            CertificateChainInspectionResult {
                is_chain_valid: self.validator.verify_chain_for_headers(&headers),
                certificate_results: extract_x5c_certificates(&headers)
                    .map(|chain| {
                        chain
                            .iter()
                            .map(CertificateInspectionResult::from_certificate)
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        });

        SignatureInspectionResult {
            is_signature_valid: verification.is_ok(),
            is_chain_valid: certificate_chain_result
                .as_ref()
                .map_or(true, |r| r.is_chain_valid),
            key_type: Some(headers.name),
            alg: Some(headers.alg.clone()),
            key_summary: Some(KeySummary::from_jwk(&headers.jwk)),
            jwk: Some(headers.jwk),
            certificate_chain_result,
            error: verification.err().map(|e| e.to_string()),
        }
    }
}
