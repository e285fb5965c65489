// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Key material adapter: turns JWKs and DER public keys into [`KeyHandle`]s
//! that can sign or verify, and back.

use crate::{
    jwk::{encode_base64url, Jwk},
    PayIdError,
};
use hmac::{Hmac, Mac};
use p256::pkcs8::DecodePublicKey;
use rand::rngs::OsRng;
use rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, RsaPrivateKey, RsaPublicKey,
};
use serde_json::Value;
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};
use std::{fmt, str::FromStr};

/// JWS signature algorithms supported for signing and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Es256,
    Es256K,
    EdDsa,
    Rs256,
    Rs384,
    Rs512,
    Hs256,
    Hs512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 8] = [
        Algorithm::Es256,
        Algorithm::Es256K,
        Algorithm::EdDsa,
        Algorithm::Rs256,
        Algorithm::Rs384,
        Algorithm::Rs512,
        Algorithm::Hs256,
        Algorithm::Hs512,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Es256 => "ES256",
            Algorithm::Es256K => "ES256K",
            Algorithm::EdDsa => "EdDSA",
            Algorithm::Rs256 => "RS256",
            Algorithm::Rs384 => "RS384",
            Algorithm::Rs512 => "RS512",
            Algorithm::Hs256 => "HS256",
            Algorithm::Hs512 => "HS512",
        }
    }
}

impl FromStr for Algorithm {
    type Err = PayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| PayIdError::UnsupportedAlgorithm(s.to_owned()))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JWK `kty` families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Ec,
    Rsa,
    Okp,
    Oct,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Ec => "EC",
            KeyType::Rsa => "RSA",
            KeyType::Okp => "OKP",
            KeyType::Oct => "oct",
        }
    }

    /// Maps a JWK `kty` value.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedKeyType`] for anything but `EC`,
    /// `RSA`, `OKP` and `oct`.
    pub fn from_kty(kty: &str) -> Result<Self, PayIdError> {
        match kty {
            "EC" => Ok(KeyType::Ec),
            "RSA" => Ok(KeyType::Rsa),
            "OKP" => Ok(KeyType::Okp),
            "oct" => Ok(KeyType::Oct),
            other => Err(PayIdError::UnsupportedKeyType(other.to_owned())),
        }
    }
}

/// Curves usable for identity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Curve {
    #[default]
    P256,
    Secp256k1,
    Ed25519,
}

impl Curve {
    pub fn as_str(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::Secp256k1 => "secp256k1",
            Curve::Ed25519 => "Ed25519",
        }
    }
}

impl FromStr for Curve {
    type Err = PayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P-256" | "p256" | "prime256v1" => Ok(Curve::P256),
            "secp256k1" | "P-256K" => Ok(Curve::Secp256k1),
            "Ed25519" | "ed25519" => Ok(Curve::Ed25519),
            other => Err(PayIdError::UnsupportedKeyType(format!("curve {other}"))),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key usable for cryptographic operations. Private variants can sign and
/// verify; public variants can only verify.
#[derive(Clone)]
pub enum KeyHandle {
    P256Private(p256::ecdsa::SigningKey),
    P256Public(p256::ecdsa::VerifyingKey),
    Secp256k1Private(k256::ecdsa::SigningKey),
    Secp256k1Public(k256::ecdsa::VerifyingKey),
    Ed25519Private(ed25519_dalek::SigningKey),
    Ed25519Public(ed25519_dalek::VerifyingKey),
    RsaPrivate(Box<RsaPrivateKey>),
    RsaPublic(Box<RsaPublicKey>),
    Oct(Vec<u8>),
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visibility = if self.is_private() { "private" } else { "public" };
        write!(
            f,
            "KeyHandle({} {visibility}, {})",
            self.key_type().as_str(),
            self.default_algorithm()
        )
    }
}

// The verifying half of a [`KeyHandle`].
enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    Secp256k1(k256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
    Rsa(RsaPublicKey),
    Oct(Vec<u8>),
}

fn key_format(e: impl fmt::Display) -> PayIdError {
    PayIdError::KeyFormat(e.to_string())
}

impl KeyHandle {
    /// Converts a JWK into a key handle. A JWK with private members yields a
    /// private handle, whose public members must match.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedKeyType`] for an unknown `kty` or
    /// curve and [`PayIdError::KeyFormat`] for malformed key parameters.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, PayIdError> {
        match KeyType::from_kty(&jwk.kty)? {
            KeyType::Ec => {
                let curve: Curve = jwk
                    .crv
                    .as_deref()
                    .ok_or_else(|| key_format("EC key has no crv"))?
                    .parse()?;
                let point = uncompressed_point(jwk)?;
                match curve {
                    Curve::P256 => {
                        let public = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                            .map_err(key_format)?;
                        if jwk.d.is_none() {
                            return Ok(KeyHandle::P256Public(public));
                        }
                        let secret =
                            p256::ecdsa::SigningKey::from_slice(&jwk.member_bytes("d", &jwk.d)?)
                                .map_err(key_format)?;
                        if *secret.verifying_key() != public {
                            return Err(key_format("private key does not match x and y"));
                        }
                        Ok(KeyHandle::P256Private(secret))
                    }
                    Curve::Secp256k1 => {
                        let public = k256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                            .map_err(key_format)?;
                        if jwk.d.is_none() {
                            return Ok(KeyHandle::Secp256k1Public(public));
                        }
                        let secret =
                            k256::ecdsa::SigningKey::from_slice(&jwk.member_bytes("d", &jwk.d)?)
                                .map_err(key_format)?;
                        if *secret.verifying_key() != public {
                            return Err(key_format("private key does not match x and y"));
                        }
                        Ok(KeyHandle::Secp256k1Private(secret))
                    }
                    Curve::Ed25519 => Err(PayIdError::UnsupportedKeyType(
                        "EC curve Ed25519".into(),
                    )),
                }
            }
            KeyType::Okp => {
                match jwk.crv.as_deref() {
                    Some("Ed25519") => {}
                    other => {
                        return Err(PayIdError::UnsupportedKeyType(format!(
                            "OKP curve {}",
                            other.unwrap_or("(none)")
                        )))
                    }
                }
                let x = fixed_32(&jwk.member_bytes("x", &jwk.x)?, "x")?;
                let public = ed25519_dalek::VerifyingKey::from_bytes(&x).map_err(key_format)?;
                if jwk.d.is_none() {
                    return Ok(KeyHandle::Ed25519Public(public));
                }
                let d = fixed_32(&jwk.member_bytes("d", &jwk.d)?, "d")?;
                let secret = ed25519_dalek::SigningKey::from_bytes(&d);
                if secret.verifying_key() != public {
                    return Err(key_format("private key does not match x"));
                }
                Ok(KeyHandle::Ed25519Private(secret))
            }
            KeyType::Rsa => {
                let n = BigUint::from_bytes_be(&jwk.member_bytes("n", &jwk.n)?);
                let e = BigUint::from_bytes_be(&jwk.member_bytes("e", &jwk.e)?);
                if jwk.d.is_none() {
                    let public = RsaPublicKey::new(n, e).map_err(key_format)?;
                    return Ok(KeyHandle::RsaPublic(Box::new(public)));
                }
                let d = BigUint::from_bytes_be(&jwk.member_bytes("d", &jwk.d)?);
                let p = BigUint::from_bytes_be(&jwk.member_bytes("p", &jwk.p)?);
                let q = BigUint::from_bytes_be(&jwk.member_bytes("q", &jwk.q)?);
                let secret =
                    RsaPrivateKey::from_components(n, e, d, vec![p, q]).map_err(key_format)?;
                secret.validate().map_err(key_format)?;
                Ok(KeyHandle::RsaPrivate(Box::new(secret)))
            }
            KeyType::Oct => {
                let k = jwk.member_bytes("k", &jwk.k)?;
                if k.is_empty() {
                    return Err(key_format("oct key is empty"));
                }
                Ok(KeyHandle::Oct(k))
            }
        }
    }

    /// Parses a DER `SubjectPublicKeyInfo`, as found in a certificate.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedKeyType`] if the key is not a P-256,
    /// secp256k1, Ed25519 or RSA key.
    pub fn from_public_key_der(der: &[u8]) -> Result<Self, PayIdError> {
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(KeyHandle::P256Public(key));
        }
        if let Ok(key) = k256::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(KeyHandle::Secp256k1Public(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
            return Ok(KeyHandle::Ed25519Public(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(KeyHandle::RsaPublic(Box::new(key)));
        }
        Err(PayIdError::UnsupportedKeyType(
            "unrecognized subject public key".into(),
        ))
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            KeyHandle::P256Private(_)
            | KeyHandle::P256Public(_)
            | KeyHandle::Secp256k1Private(_)
            | KeyHandle::Secp256k1Public(_) => KeyType::Ec,
            KeyHandle::Ed25519Private(_) | KeyHandle::Ed25519Public(_) => KeyType::Okp,
            KeyHandle::RsaPrivate(_) | KeyHandle::RsaPublic(_) => KeyType::Rsa,
            KeyHandle::Oct(_) => KeyType::Oct,
        }
    }

    pub fn curve(&self) -> Option<Curve> {
        match self {
            KeyHandle::P256Private(_) | KeyHandle::P256Public(_) => Some(Curve::P256),
            KeyHandle::Secp256k1Private(_) | KeyHandle::Secp256k1Public(_) => {
                Some(Curve::Secp256k1)
            }
            KeyHandle::Ed25519Private(_) | KeyHandle::Ed25519Public(_) => Some(Curve::Ed25519),
            _ => None,
        }
    }

    /// Symmetric keys count as private.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            KeyHandle::P256Private(_)
                | KeyHandle::Secp256k1Private(_)
                | KeyHandle::Ed25519Private(_)
                | KeyHandle::RsaPrivate(_)
                | KeyHandle::Oct(_)
        )
    }

    /// The algorithm used when none is configured: `ES256` for P-256,
    /// `ES256K` for secp256k1, `EdDSA` for Ed25519, `RS512` for RSA and
    /// `HS512` for symmetric keys.
    pub fn default_algorithm(&self) -> Algorithm {
        match self.key_type() {
            KeyType::Ec if self.curve() == Some(Curve::Secp256k1) => Algorithm::Es256K,
            KeyType::Ec => Algorithm::Es256,
            KeyType::Okp => Algorithm::EdDsa,
            KeyType::Rsa => Algorithm::Rs512,
            KeyType::Oct => Algorithm::Hs512,
        }
    }

    /// Reports whether `alg` can be used with this key.
    pub fn supports(&self, alg: Algorithm) -> bool {
        match alg {
            Algorithm::Es256 => self.curve() == Some(Curve::P256),
            Algorithm::Es256K => self.curve() == Some(Curve::Secp256k1),
            Algorithm::EdDsa => self.curve() == Some(Curve::Ed25519),
            Algorithm::Rs256 | Algorithm::Rs384 | Algorithm::Rs512 => {
                self.key_type() == KeyType::Rsa
            }
            Algorithm::Hs256 | Algorithm::Hs512 => self.key_type() == KeyType::Oct,
        }
    }

    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] if `alg` does not fit the
    /// key.
    pub fn check_algorithm(&self, alg: Algorithm) -> Result<(), PayIdError> {
        if self.supports(alg) {
            Ok(())
        } else {
            Err(PayIdError::UnsupportedAlgorithm(format!(
                "{alg} cannot be used with {:?}",
                self
            )))
        }
    }

    fn verifying_key(&self) -> PublicKey {
        match self {
            KeyHandle::P256Private(k) => PublicKey::P256(*k.verifying_key()),
            KeyHandle::P256Public(k) => PublicKey::P256(*k),
            KeyHandle::Secp256k1Private(k) => PublicKey::Secp256k1(*k.verifying_key()),
            KeyHandle::Secp256k1Public(k) => PublicKey::Secp256k1(*k),
            KeyHandle::Ed25519Private(k) => PublicKey::Ed25519(k.verifying_key()),
            KeyHandle::Ed25519Public(k) => PublicKey::Ed25519(*k),
            KeyHandle::RsaPrivate(k) => PublicKey::Rsa(k.to_public_key()),
            KeyHandle::RsaPublic(k) => PublicKey::Rsa(k.as_ref().clone()),
            KeyHandle::Oct(k) => PublicKey::Oct(k.clone()),
        }
    }

    /// Returns the public half of the key. Symmetric keys are returned as-is.
    #[must_use]
    pub fn public_key(&self) -> KeyHandle {
        match self.verifying_key() {
            PublicKey::P256(k) => KeyHandle::P256Public(k),
            PublicKey::Secp256k1(k) => KeyHandle::Secp256k1Public(k),
            PublicKey::Ed25519(k) => KeyHandle::Ed25519Public(k),
            PublicKey::Rsa(k) => KeyHandle::RsaPublic(Box::new(k)),
            PublicKey::Oct(k) => KeyHandle::Oct(k),
        }
    }

    /// Returns the public JWK for this key, with every private member left
    /// out. For a symmetric key only `kty` remains.
    ///
    /// # Errors
    ///
    /// Returns an error if a point cannot be encoded.
    pub fn to_public_only(&self) -> Result<Jwk, PayIdError> {
        let jwk = match self.verifying_key() {
            PublicKey::P256(k) => ec_jwk(Curve::P256, k.to_encoded_point(false).as_bytes())?,
            PublicKey::Secp256k1(k) => {
                ec_jwk(Curve::Secp256k1, k.to_encoded_point(false).as_bytes())?
            }
            PublicKey::Ed25519(k) => Jwk {
                kty: KeyType::Okp.as_str().into(),
                crv: Some(Curve::Ed25519.as_str().into()),
                x: Some(encode_base64url(k.as_bytes())),
                ..Default::default()
            },
            PublicKey::Rsa(k) => Jwk {
                kty: KeyType::Rsa.as_str().into(),
                n: Some(encode_base64url(k.n().to_bytes_be())),
                e: Some(encode_base64url(k.e().to_bytes_be())),
                ..Default::default()
            },
            PublicKey::Oct(_) => Jwk {
                kty: KeyType::Oct.as_str().into(),
                ..Default::default()
            },
        };
        Ok(jwk)
    }

    /// Returns the full JWK, including private members when present.
    ///
    /// # Errors
    ///
    /// Returns an error if a point cannot be encoded.
    pub fn to_private_jwk(&self) -> Result<Jwk, PayIdError> {
        let mut jwk = self.to_public_only()?;
        match self {
            KeyHandle::P256Private(k) => jwk.d = Some(encode_base64url(k.to_bytes())),
            KeyHandle::Secp256k1Private(k) => jwk.d = Some(encode_base64url(k.to_bytes())),
            KeyHandle::Ed25519Private(k) => jwk.d = Some(encode_base64url(k.to_bytes())),
            KeyHandle::RsaPrivate(k) => {
                let [p, q] = k.primes() else {
                    return Err(key_format("only two-prime RSA keys can be exported"));
                };
                let one = BigUint::from(1u32);
                let two = BigUint::from(2u32);
                jwk.d = Some(encode_base64url(k.d().to_bytes_be()));
                jwk.p = Some(encode_base64url(p.to_bytes_be()));
                jwk.q = Some(encode_base64url(q.to_bytes_be()));
                jwk.dp = Some(encode_base64url((k.d() % &(p - &one)).to_bytes_be()));
                jwk.dq = Some(encode_base64url((k.d() % &(q - &one)).to_bytes_be()));
                // q^-1 mod p, by Fermat since p is prime.
                jwk.qi = Some(encode_base64url(q.modpow(&(p - &two), p).to_bytes_be()));
            }
            KeyHandle::Oct(k) => jwk.k = Some(encode_base64url(k)),
            _ => {}
        }
        Ok(jwk)
    }

    /// Signs `msg` with `alg`.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] if `alg` does not fit the
    /// key, or [`PayIdError::KeyFormat`] if this is a public key.
    pub fn sign(&self, alg: Algorithm, msg: &[u8]) -> Result<Vec<u8>, PayIdError> {
        self.check_algorithm(alg)?;
        let signature = match self {
            KeyHandle::P256Private(k) => {
                let sig: p256::ecdsa::Signature = k.try_sign(msg)?;
                sig.to_vec()
            }
            KeyHandle::Secp256k1Private(k) => {
                let sig: k256::ecdsa::Signature = k.try_sign(msg)?;
                sig.to_vec()
            }
            KeyHandle::Ed25519Private(k) => {
                let sig: ed25519_dalek::Signature = k.try_sign(msg)?;
                sig.to_vec()
            }
            KeyHandle::RsaPrivate(k) => {
                let key = k.as_ref().clone();
                match alg {
                    Algorithm::Rs256 => rsa::pkcs1v15::SigningKey::<Sha256>::new(key)
                        .try_sign(msg)?
                        .to_vec(),
                    Algorithm::Rs384 => rsa::pkcs1v15::SigningKey::<Sha384>::new(key)
                        .try_sign(msg)?
                        .to_vec(),
                    _ => rsa::pkcs1v15::SigningKey::<Sha512>::new(key)
                        .try_sign(msg)?
                        .to_vec(),
                }
            }
            KeyHandle::Oct(k) => hmac_tag(alg, k, msg)?,
            KeyHandle::P256Public(_)
            | KeyHandle::Secp256k1Public(_)
            | KeyHandle::Ed25519Public(_)
            | KeyHandle::RsaPublic(_) => return Err(key_format("cannot sign with a public key")),
        };
        Ok(signature)
    }

    /// Verifies `sig` over `msg` with `alg`. High-S secp256k1 signatures are
    /// normalized before verification.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] if `alg` does not fit the
    /// key, and [`PayIdError::Signature`] or [`PayIdError::InvalidSignature`]
    /// if the signature is malformed or does not verify.
    pub fn verify(&self, alg: Algorithm, msg: &[u8], sig: &[u8]) -> Result<(), PayIdError> {
        self.check_algorithm(alg)?;
        match self.verifying_key() {
            PublicKey::P256(k) => {
                let sig = p256::ecdsa::Signature::from_slice(sig)?;
                k.verify(msg, &sig)?;
            }
            PublicKey::Secp256k1(k) => {
                let sig = k256::ecdsa::Signature::from_slice(sig)?;
                let sig = sig.normalize_s().unwrap_or(sig);
                k.verify(msg, &sig)?;
            }
            PublicKey::Ed25519(k) => {
                let sig = ed25519_dalek::Signature::from_slice(sig)?;
                k.verify(msg, &sig)?;
            }
            PublicKey::Rsa(key) => {
                let sig = rsa::pkcs1v15::Signature::try_from(sig)?;
                match alg {
                    Algorithm::Rs256 => {
                        rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key).verify(msg, &sig)?;
                    }
                    Algorithm::Rs384 => {
                        rsa::pkcs1v15::VerifyingKey::<Sha384>::new(key).verify(msg, &sig)?;
                    }
                    _ => {
                        rsa::pkcs1v15::VerifyingKey::<Sha512>::new(key).verify(msg, &sig)?;
                    }
                }
            }
            PublicKey::Oct(k) => {
                let expected = hmac_tag(alg, &k, msg)?;
                if !constant_time_eq(&expected, sig) {
                    return Err(PayIdError::InvalidSignature);
                }
            }
        }
        Ok(())
    }
}

fn hmac_tag(alg: Algorithm, key: &[u8], msg: &[u8]) -> Result<Vec<u8>, PayIdError> {
    let tag = match alg {
        Algorithm::Hs256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(key_format)?;
            mac.update(msg);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Hs512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(key_format)?;
            mac.update(msg);
            mac.finalize().into_bytes().to_vec()
        }
        other => return Err(PayIdError::UnsupportedAlgorithm(other.to_string())),
    };
    Ok(tag)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn fixed_32(bytes: &[u8], name: &str) -> Result<[u8; 32], PayIdError> {
    <[u8; 32]>::try_from(bytes)
        .map_err(|_| key_format(format!("{name} must be 32 bytes, got {}", bytes.len())))
}

// SEC1 uncompressed encoding of the JWK's x and y coordinates.
fn uncompressed_point(jwk: &Jwk) -> Result<Vec<u8>, PayIdError> {
    let x = fixed_32(&jwk.member_bytes("x", &jwk.x)?, "x")?;
    let y = fixed_32(&jwk.member_bytes("y", &jwk.y)?, "y")?;
    let mut point = Vec::with_capacity(65);
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}

fn ec_jwk(curve: Curve, point: &[u8]) -> Result<Jwk, PayIdError> {
    match point {
        [0x04, coordinates @ ..] if coordinates.len() == 64 => {
            let (x, y) = coordinates.split_at(32);
            Ok(Jwk {
                kty: KeyType::Ec.as_str().into(),
                crv: Some(curve.as_str().into()),
                x: Some(encode_base64url(x)),
                y: Some(encode_base64url(y)),
                ..Default::default()
            })
        }
        _ => Err(key_format("expected an uncompressed curve point")),
    }
}

/// Picks the default algorithm for a JWK without building a key handle.
///
/// # Errors
///
/// Returns [`PayIdError::UnsupportedKeyType`] for an unknown `kty`.
pub fn default_algorithm_for_jwk(jwk: &Jwk) -> Result<Algorithm, PayIdError> {
    Ok(match KeyType::from_kty(&jwk.kty)? {
        KeyType::Ec if jwk.crv.as_deref() == Some(Curve::Secp256k1.as_str()) => Algorithm::Es256K,
        KeyType::Ec => Algorithm::Es256,
        KeyType::Okp => Algorithm::EdDsa,
        KeyType::Rsa => Algorithm::Rs512,
        KeyType::Oct => Algorithm::Hs512,
    })
}

/// Returns the `jwk` member of a decoded protected header, if present and
/// well-formed.
pub fn extract_public_key_from_header(header_json: &str) -> Option<Jwk> {
    let mut header: Value = serde_json::from_str(header_json).ok()?;
    serde_json::from_value(header.get_mut("jwk")?.take()).ok()
}

/// Generates a new identity key as a private JWK, with `kid` set to its
/// thumbprint.
///
/// # Errors
///
/// Returns an error if the generated key cannot be encoded.
pub fn generate_identity_key(curve: Curve) -> Result<Jwk, PayIdError> {
    let key = match curve {
        Curve::P256 => KeyHandle::P256Private(p256::ecdsa::SigningKey::random(&mut OsRng)),
        Curve::Secp256k1 => {
            KeyHandle::Secp256k1Private(k256::ecdsa::SigningKey::random(&mut OsRng))
        }
        Curve::Ed25519 => KeyHandle::Ed25519Private(ed25519_dalek::SigningKey::generate(&mut OsRng)),
    };
    let mut jwk = key.to_private_jwk()?;
    jwk.kid = Some(jwk.thumbprint()?);
    jwk.alg = Some(key.default_algorithm().as_str().into());
    jwk.key_use = Some("sig".into());
    Ok(jwk)
}
