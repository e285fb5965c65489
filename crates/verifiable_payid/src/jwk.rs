// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! JSON Web Keys ([RFC 7517](https://www.rfc-editor.org/rfc/rfc7517)) and
//! their [RFC 7638](https://www.rfc-editor.org/rfc/rfc7638) thumbprints.

use crate::PayIdError;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// A JSON Web Key. Members this crate does not interpret are kept in
/// `extra` so that a key survives a decode/encode cycle.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Base64 (standard alphabet) DER certificates, leaf first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Private members are never printed.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("n", &self.n)
            .field("e", &self.e)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("use", &self.key_use)
            .field("x5c", &self.x5c.as_ref().map(Vec::len))
            .field("private", &self.is_private())
            .finish_non_exhaustive()
    }
}

impl Jwk {
    /// Reports whether any private or secret member is present.
    pub fn is_private(&self) -> bool {
        self.d.is_some()
            || self.p.is_some()
            || self.q.is_some()
            || self.dp.is_some()
            || self.dq.is_some()
            || self.qi.is_some()
            || self.k.is_some()
            || self.extra.contains_key("oth")
    }

    /// Returns a copy with every private or secret member removed. This is
    /// the only form of a key that may be embedded in a signature header.
    #[must_use]
    pub fn to_public_only(&self) -> Jwk {
        let mut public = self.clone();
        public.d = None;
        public.p = None;
        public.q = None;
        public.dp = None;
        public.dq = None;
        public.qi = None;
        public.k = None;
        public.extra.remove("oth");
        public
    }

    /// Computes the RFC 7638 SHA-256 thumbprint, base64url encoded.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::KeyFormat`] if a required member is missing, or
    /// [`PayIdError::UnsupportedKeyType`] for an unknown `kty`.
    pub fn thumbprint(&self) -> Result<String, PayIdError> {
        let kty = self.kty.as_str();
        // Members must be listed in lexicographic order.
        let members = match kty {
            "EC" => vec![
                required_member(kty, "crv", &self.crv)?,
                ("kty", "EC"),
                required_member(kty, "x", &self.x)?,
                required_member(kty, "y", &self.y)?,
            ],
            "RSA" => vec![
                required_member(kty, "e", &self.e)?,
                ("kty", "RSA"),
                required_member(kty, "n", &self.n)?,
            ],
            "OKP" => vec![
                required_member(kty, "crv", &self.crv)?,
                ("kty", "OKP"),
                required_member(kty, "x", &self.x)?,
            ],
            "oct" => vec![required_member(kty, "k", &self.k)?, ("kty", "oct")],
            other => return Err(PayIdError::UnsupportedKeyType(other.to_owned())),
        };

        let mut canonical = String::from("{");
        for (i, (name, value)) in members.into_iter().enumerate() {
            if i > 0 {
                canonical.push(',');
            }
            canonical.push_str(&serde_json::to_string(name)?);
            canonical.push(':');
            canonical.push_str(&serde_json::to_string(value)?);
        }
        canonical.push('}');

        Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Decodes a base64url member, failing with [`PayIdError::KeyFormat`]
    /// when it is absent or not base64.
    pub(crate) fn member_bytes(
        &self,
        name: &str,
        value: &Option<String>,
    ) -> Result<Vec<u8>, PayIdError> {
        let encoded = value
            .as_deref()
            .ok_or_else(|| PayIdError::KeyFormat(format!("{} key has no {name}", self.kty)))?;
        decode_base64_lenient(encoded)
            .map_err(|e| PayIdError::KeyFormat(format!("{name}: {e}")))
    }
}

fn required_member<'a>(
    kty: &str,
    name: &'static str,
    value: &'a Option<String>,
) -> Result<(&'static str, &'a str), PayIdError> {
    value
        .as_deref()
        .map(|v| (name, v))
        .ok_or_else(|| PayIdError::KeyFormat(format!("{kty} key has no {name}")))
}

/// Base64url without padding, as used for every JOSE binary member.
pub(crate) fn encode_base64url(bytes: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes base64 in either alphabet, with or without padding.
///
/// # Errors
///
/// Returns an error if the input is not base64.
pub fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    BASE64_URL_SAFE_NO_PAD.decode(normalized)
}
