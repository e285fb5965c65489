// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Verification of verified addresses and whole PayID documents.
//!
//! Every signature is checked against the public key embedded in its own
//! protected header. Trust in that key comes from the certificate chain for
//! server keys. Failures are reported as `false` and logged at debug level.

use crate::{
    chain::CertificateChainValidator,
    jwk::decode_base64_lenient,
    keys::{Algorithm, KeyHandle},
    model::{PaymentInformation, ProtectedHeaders, VerifiedAddress, VerifiedAddressSignature},
    signing::signing_input,
    PayIdError,
};
use serde_json::Value;

/// Whether certificate chains of server-key signatures are validated.
#[derive(Clone, Copy)]
pub enum ChainCheck<'a> {
    Enforce(&'a CertificateChainValidator),
    Skip,
}

/// Checks one signature over `payload` against the key embedded in its
/// header and returns the decoded header.
pub(crate) fn verify_signature(
    payload: &str,
    signature: &VerifiedAddressSignature,
) -> Result<ProtectedHeaders, PayIdError> {
    let headers = ProtectedHeaders::decode(&signature.protected)?;
    headers.check_unencoded_payload()?;
    let alg: Algorithm = headers.alg.parse()?;
    // Only public members of the embedded key are used, so a symmetric key
    // can never verify.
    let key = KeyHandle::from_jwk(&headers.jwk.to_public_only())?;
    let sig = decode_base64_lenient(&signature.signature)
        .map_err(|_| PayIdError::InvalidSignature)?;
    key.verify(alg, &signing_input(&signature.protected, payload), &sig)?;
    Ok(headers)
}

// The payId inside a payload, read without interpreting the address.
pub(crate) fn payload_pay_id(payload: &str) -> Option<String> {
    match serde_json::from_str::<Value>(payload).ok()?.get("payId")? {
        Value::String(pay_id) => Some(pay_id.clone()),
        _ => None,
    }
}

/// Verifies a signed address for `expected_pay_id`.
///
/// The payload must name `expected_pay_id`, there must be at least one
/// signature, and every signature must verify. With
/// [`ChainCheck::Enforce`], server-key signatures must also carry a chain to
/// a trusted root.
pub fn verify_signed_address(
    expected_pay_id: &str,
    verified_address: &VerifiedAddress,
    chain_check: ChainCheck<'_>,
) -> bool {
    match payload_pay_id(&verified_address.payload) {
        Some(pay_id) if pay_id == expected_pay_id => {}
        Some(pay_id) => {
            log::debug!("Payload is for {pay_id}, expected {expected_pay_id}");
            return false;
        }
        None => {
            log::debug!("Payload has no payId");
            return false;
        }
    }
    if verified_address.signatures.is_empty() {
        log::debug!("Verified address has no signatures");
        return false;
    }
    verified_address.signatures.iter().enumerate().all(|(i, signature)| {
        match verify_signature(&verified_address.payload, signature) {
            Ok(headers) => match chain_check {
                ChainCheck::Enforce(validator) => validator.verify_chain_for_headers(&headers),
                ChainCheck::Skip => true,
            },
            Err(e) => {
                log::debug!("Signature #{i} rejected: {e}");
                false
            }
        }
    })
}

/// Verifies every verified address of a PayID document. A document without
/// a payId fails; one without verified addresses passes.
pub fn verify_pay_id(info: &PaymentInformation, chain_check: ChainCheck<'_>) -> bool {
    let Some(pay_id) = info.pay_id() else {
        log::debug!("Document has no payId");
        return false;
    };
    info.verified_addresses
        .iter()
        .all(|address| verify_signed_address(pay_id, address, chain_check))
}

/// Parses a PayID document and verifies it.
///
/// # Errors
///
/// Returns an error only if `json` is not a PaymentInformation document.
pub fn verify_pay_id_json(json: &str, chain_check: ChainCheck<'_>) -> Result<bool, PayIdError> {
    Ok(verify_pay_id(
        &PaymentInformation::from_json(json)?,
        chain_check,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        files::signing_key_from_pem,
        jwk::{encode_base64url, Jwk},
        model::{Address, KeyName},
        signing::{sign, sign_with_keys, IdentityKeySigningParams, ServerKeySigningParams, SigningParams},
    };
    use x509_util::UnixTimestamp;

    const PAY_ID: &str = "alice$payid.example";
    const SIGNED: &str = include_str!("../tests/signed-payid.json");
    const ROGUE_SIGNED: &str = include_str!("../tests/rogue-signed-payid.json");
    const ES256K: &str = include_str!("../tests/es256k-payid.json");
    const AT: UnixTimestamp = 1_893_456_000_000;

    fn address() -> Address {
        Address::crypto(
            "XRPL",
            Some("TESTNET"),
            "rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6",
            None,
        )
    }

    fn trusting_root() -> CertificateChainValidator {
        let mut validator = CertificateChainValidator::empty().with_verification_time(AT);
        validator
            .add_root_certificate(include_str!("../tests/root.pem"))
            .unwrap();
        validator
    }

    fn identity(pem: &str) -> IdentityKeySigningParams {
        IdentityKeySigningParams::new(signing_key_from_pem(pem).unwrap())
    }

    fn server() -> ServerKeySigningParams {
        let key = signing_key_from_pem(include_str!("../tests/server.key")).unwrap();
        let jwk =
            crate::files::jwk_or_cert_chain_from_str(include_str!("../tests/server.fullchain.pem"))
                .unwrap();
        ServerKeySigningParams::new(key, jwk).unwrap()
    }

    macro_rules! test_round_trip {
        ($name:ident; $pem:literal) => {
            #[test]
            fn $name() {
                let signed = sign(PAY_ID, &address(), identity(include_str!($pem))).unwrap();
                assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
                let empty = CertificateChainValidator::empty();
                assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Enforce(&empty)));
            }
        };
    }

    test_round_trip!(test_round_trip_p256; "../tests/identity-p256.key");
    test_round_trip!(test_round_trip_secp256k1; "../tests/identity-secp256k1.key");
    test_round_trip!(test_round_trip_ed25519; "../tests/identity-ed25519.key");
    test_round_trip!(test_round_trip_rsa; "../tests/identity-rsa.key");

    #[test]
    fn test_tampered_payload() {
        let signed = sign(
            PAY_ID,
            &address(),
            identity(include_str!("../tests/identity-p256.key")),
        )
        .unwrap();
        let len = signed.payload.len();
        for i in [0, 12, len / 2, len - 3, len - 1] {
            let mut tampered = signed.clone();
            let mut bytes = tampered.payload.into_bytes();
            bytes[i] = if bytes[i] == b'x' { b'y' } else { b'x' };
            tampered.payload = String::from_utf8(bytes).unwrap();
            assert!(
                !verify_signed_address(PAY_ID, &tampered, ChainCheck::Skip),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_address_swap_is_detected() {
        let signed = sign(
            PAY_ID,
            &address(),
            identity(include_str!("../tests/identity-p256.key")),
        )
        .unwrap();
        let mut swapped = signed.clone();
        swapped.payload = signed.payload.replace("rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6", "rAttacker");
        assert!(!verify_signed_address(PAY_ID, &swapped, ChainCheck::Skip));
    }

    #[test]
    fn test_identity_binding() {
        let signed = sign(
            PAY_ID,
            &address(),
            identity(include_str!("../tests/identity-p256.key")),
        )
        .unwrap();
        assert!(!verify_signed_address("mallory$payid.example", &signed, ChainCheck::Skip));
    }

    #[test]
    fn test_multiple_signatures() {
        let params: Vec<SigningParams> = vec![
            server().into(),
            identity(include_str!("../tests/identity-ed25519.key")).into(),
            identity(include_str!("../tests/identity-secp256k1.key")).into(),
        ];
        let signed = sign_with_keys(PAY_ID, &address(), &params).unwrap();
        assert_eq!(signed.signatures.len(), 3);

        let validator = trusting_root();
        assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Enforce(&validator)));

        // Any single bad signature fails the whole address.
        for i in 0..3 {
            let mut broken = signed.clone();
            broken.signatures[i].signature = signed.signatures[(i + 1) % 3].signature.clone();
            assert!(!verify_signed_address(PAY_ID, &broken, ChainCheck::Skip), "signature {i}");
        }

        // An untrusted chain fails only when chains are checked.
        let untrusted = CertificateChainValidator::empty();
        assert!(!verify_signed_address(PAY_ID, &signed, ChainCheck::Enforce(&untrusted)));
        assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
    }

    #[test]
    fn test_no_signatures() {
        let mut signed = sign(
            PAY_ID,
            &address(),
            identity(include_str!("../tests/identity-p256.key")),
        )
        .unwrap();
        signed.signatures.clear();
        assert!(!verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
    }

    #[test]
    fn test_pay_id_without_verified_addresses() {
        let info = PaymentInformation::new(PAY_ID);
        assert!(verify_pay_id(&info, ChainCheck::Skip));
        assert!(verify_pay_id(
            &info,
            ChainCheck::Enforce(&CertificateChainValidator::empty())
        ));
    }

    #[test]
    fn test_pay_id_missing() {
        let mut info = PaymentInformation::from_json(SIGNED).unwrap();
        info.pay_id = None;
        assert!(!verify_pay_id(&info, ChainCheck::Skip));
        info.pay_id = Some(String::new());
        assert!(!verify_pay_id(&info, ChainCheck::Skip));
    }

    #[test]
    fn test_independently_signed_document() {
        let validator = trusting_root();
        assert!(verify_pay_id_json(SIGNED, ChainCheck::Enforce(&validator)).unwrap());
        assert!(verify_pay_id_json(SIGNED, ChainCheck::Skip).unwrap());
        let untrusted = CertificateChainValidator::empty();
        assert!(!verify_pay_id_json(SIGNED, ChainCheck::Enforce(&untrusted)).unwrap());
    }

    #[test]
    fn test_rogue_document() {
        let validator = trusting_root();
        assert!(!verify_pay_id_json(ROGUE_SIGNED, ChainCheck::Enforce(&validator)).unwrap());
        assert!(verify_pay_id_json(ROGUE_SIGNED, ChainCheck::Skip).unwrap());
    }

    #[test]
    fn test_es256k_high_s_vector() {
        assert!(verify_pay_id_json(ES256K, ChainCheck::Skip).unwrap());
        let info = PaymentInformation::from_json(ES256K).unwrap();
        assert!(!verify_signed_address(
            "bob$foo",
            &info.verified_addresses[0],
            ChainCheck::Skip
        ));
    }

    #[test]
    fn test_not_a_document() {
        assert!(verify_pay_id_json("[]", ChainCheck::Skip).is_err());
    }

    // Signs with a hand-built header, bypassing the header checks of the
    // signing engine.
    fn sign_with_header(headers: &ProtectedHeaders, pem: &str, alg: Algorithm) -> VerifiedAddress {
        let key = signing_key_from_pem(pem).unwrap();
        let payload = crate::model::UnsignedVerifiedAddress {
            pay_id: PAY_ID.into(),
            pay_id_address: address(),
        }
        .to_payload()
        .unwrap();
        let protected = headers.encode().unwrap();
        let sig = key.sign(alg, &signing_input(&protected, &payload)).unwrap();
        VerifiedAddress {
            payload,
            signatures: vec![VerifiedAddressSignature {
                protected,
                signature: encode_base64url(sig),
            }],
        }
    }

    fn p256_headers() -> ProtectedHeaders {
        let key = signing_key_from_pem(include_str!("../tests/identity-p256.key")).unwrap();
        ProtectedHeaders::new(KeyName::IdentityKey, "ES256", key.to_public_only().unwrap())
    }

    #[test]
    fn test_hand_built_header_verifies() {
        let signed = sign_with_header(
            &p256_headers(),
            include_str!("../tests/identity-p256.key"),
            Algorithm::Es256,
        );
        assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
    }

    macro_rules! test_rejected_header {
        ($name:ident; |$h:ident| $mutate:expr) => {
            #[test]
            fn $name() {
                let mut $h = p256_headers();
                $mutate;
                let signed = sign_with_header(
                    &$h,
                    include_str!("../tests/identity-p256.key"),
                    Algorithm::Es256,
                );
                assert!(!verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
            }
        };
    }

    test_rejected_header!(test_encoded_payload_header; |h| h.b64 = Some(true));
    test_rejected_header!(test_missing_b64_header; |h| h.b64 = None);
    test_rejected_header!(test_unknown_critical_header; |h| h.crit = Some(vec!["b64".into(), "exp".into()]));
    test_rejected_header!(test_wrong_algorithm; |h| h.alg = "ES256K".into());
    test_rejected_header!(test_unknown_algorithm; |h| h.alg = "none".into());
    test_rejected_header!(test_other_embedded_key; |h| {
        let other = signing_key_from_pem(include_str!("../tests/server.key")).unwrap();
        h.jwk = other.to_public_only().unwrap();
    });

    #[test]
    fn test_symmetric_key_never_verifies() {
        let secret = b"a shared secret that is long enough";
        let headers = ProtectedHeaders::new(
            KeyName::IdentityKey,
            "HS256",
            Jwk {
                kty: "oct".into(),
                k: Some(encode_base64url(secret)),
                ..Default::default()
            },
        );
        let payload = crate::model::UnsignedVerifiedAddress {
            pay_id: PAY_ID.into(),
            pay_id_address: address(),
        }
        .to_payload()
        .unwrap();
        let protected = headers.encode().unwrap();
        let sig = KeyHandle::Oct(secret.to_vec())
            .sign(Algorithm::Hs256, &signing_input(&protected, &payload))
            .unwrap();
        let signed = VerifiedAddress {
            payload,
            signatures: vec![VerifiedAddressSignature {
                protected,
                signature: encode_base64url(sig),
            }],
        };
        assert!(!verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
    }

    #[test]
    fn test_padded_standard_base64_signature() {
        use base64::prelude::*;
        let mut signed = sign(
            PAY_ID,
            &address(),
            identity(include_str!("../tests/identity-ed25519.key")),
        )
        .unwrap();
        let raw = decode_base64_lenient(&signed.signatures[0].signature).unwrap();
        signed.signatures[0].signature = BASE64_STANDARD.encode(raw);
        assert!(verify_signed_address(PAY_ID, &signed, ChainCheck::Skip));
    }
}
