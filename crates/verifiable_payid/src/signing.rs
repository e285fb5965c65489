// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Producing verified addresses: detached, unencoded-payload JWS signatures
//! over one canonical payload, one signature per key.

use crate::{
    jwk::{encode_base64url, Jwk},
    keys::{Algorithm, KeyHandle},
    model::{
        Address, KeyName, ProtectedHeaders, UnsignedVerifiedAddress, VerifiedAddress,
        VerifiedAddressSignature,
    },
    PayIdError,
};

/// Signing with an identity key. The public key is embedded in the header.
#[derive(Debug, Clone)]
pub struct IdentityKeySigningParams {
    key: KeyHandle,
    alg: Algorithm,
}

impl IdentityKeySigningParams {
    /// Uses the key's default algorithm.
    pub fn new(key: KeyHandle) -> Self {
        let alg = key.default_algorithm();
        Self { key, alg }
    }

    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] if `alg` does not fit the
    /// key.
    pub fn with_algorithm(key: KeyHandle, alg: Algorithm) -> Result<Self, PayIdError> {
        key.check_algorithm(alg)?;
        Ok(Self { key, alg })
    }
}

/// Signing with a server key. The embedded JWK carries the certificate chain
/// (`x5c`) that vouches for the key.
#[derive(Debug, Clone)]
pub struct ServerKeySigningParams {
    key: KeyHandle,
    alg: Algorithm,
    jwk: Jwk,
}

impl ServerKeySigningParams {
    /// Uses the key's default algorithm.
    ///
    /// # Errors
    ///
    /// See [`ServerKeySigningParams::with_algorithm`].
    pub fn new(key: KeyHandle, jwk: Jwk) -> Result<Self, PayIdError> {
        let alg = key.default_algorithm();
        Self::with_algorithm(key, alg, jwk)
    }

    /// # Errors
    ///
    /// Returns [`PayIdError::MissingCertificateChain`] if `jwk` has no `x5c`,
    /// [`PayIdError::KeyFormat`] if `jwk` is not the public half of `key`,
    /// or [`PayIdError::UnsupportedAlgorithm`] if `alg` does not fit the key.
    pub fn with_algorithm(key: KeyHandle, alg: Algorithm, jwk: Jwk) -> Result<Self, PayIdError> {
        key.check_algorithm(alg)?;
        if jwk.x5c.as_ref().is_none_or(Vec::is_empty) {
            return Err(PayIdError::MissingCertificateChain);
        }
        if key.to_public_only()?.thumbprint()? != jwk.thumbprint()? {
            return Err(PayIdError::KeyFormat(
                "server key does not match the certificate".into(),
            ));
        }
        Ok(Self {
            key,
            alg,
            jwk: jwk.to_public_only(),
        })
    }
}

/// A key to sign with, discriminated by the role it plays.
#[derive(Debug, Clone)]
pub enum SigningParams {
    IdentityKey(IdentityKeySigningParams),
    ServerKey(ServerKeySigningParams),
}

impl SigningParams {
    pub fn key_type(&self) -> KeyName {
        match self {
            SigningParams::IdentityKey(_) => KeyName::IdentityKey,
            SigningParams::ServerKey(_) => KeyName::ServerKey,
        }
    }

    pub fn key(&self) -> &KeyHandle {
        match self {
            SigningParams::IdentityKey(p) => &p.key,
            SigningParams::ServerKey(p) => &p.key,
        }
    }

    pub fn alg(&self) -> Algorithm {
        match self {
            SigningParams::IdentityKey(p) => p.alg,
            SigningParams::ServerKey(p) => p.alg,
        }
    }

    // The public key material placed in the protected header.
    fn header_jwk(&self) -> Result<Jwk, PayIdError> {
        match self {
            SigningParams::IdentityKey(p) => p.key.to_public_only(),
            SigningParams::ServerKey(p) => Ok(p.jwk.clone()),
        }
    }

    fn sign(&self, payload: &str) -> Result<VerifiedAddressSignature, PayIdError> {
        let headers = ProtectedHeaders::new(self.key_type(), self.alg().as_str(), self.header_jwk()?);
        let protected = headers.encode()?;
        let signature = self
            .key()
            .sign(self.alg(), &signing_input(&protected, payload))?;
        Ok(VerifiedAddressSignature {
            protected,
            signature: encode_base64url(signature),
        })
    }
}

impl From<IdentityKeySigningParams> for SigningParams {
    fn from(params: IdentityKeySigningParams) -> Self {
        SigningParams::IdentityKey(params)
    }
}

impl From<ServerKeySigningParams> for SigningParams {
    fn from(params: ServerKeySigningParams) -> Self {
        SigningParams::ServerKey(params)
    }
}

/// The JWS signing input for an unencoded payload: the protected header as it
/// appears on the wire, a period, then the raw payload bytes.
pub(crate) fn signing_input(protected: &str, payload: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(protected.len() + 1 + payload.len());
    input.extend_from_slice(protected.as_bytes());
    input.push(b'.');
    input.extend_from_slice(payload.as_bytes());
    input
}

/// Signs `address` for `pay_id` with every key in `params`. The payload is
/// serialized once and shared by all signatures, which appear in the order
/// of `params`.
///
/// # Errors
///
/// Returns [`PayIdError::NoSigningKey`] if `params` is empty, or the first
/// error raised while signing.
pub fn sign_with_keys(
    pay_id: &str,
    address: &Address,
    params: &[SigningParams],
) -> Result<VerifiedAddress, PayIdError> {
    if params.is_empty() {
        return Err(PayIdError::NoSigningKey);
    }
    let payload = UnsignedVerifiedAddress {
        pay_id: pay_id.to_owned(),
        pay_id_address: address.clone(),
    }
    .to_payload()?;
    let signatures = params
        .iter()
        .map(|p| p.sign(&payload))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(VerifiedAddress {
        payload,
        signatures,
    })
}

/// Signs `address` for `pay_id` with a single identity key.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn sign(
    pay_id: &str,
    address: &Address,
    params: IdentityKeySigningParams,
) -> Result<VerifiedAddress, PayIdError> {
    sign_with_keys(pay_id, address, &[params.into()])
}
