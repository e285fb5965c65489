// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! PayID documents and the detached-signature structures that travel inside
//! them.
//!
//! Field order of [`Address`] and [`UnsignedVerifiedAddress`] is significant:
//! the signed payload is the compact `serde_json` serialization of an
//! [`UnsignedVerifiedAddress`], so reordering members changes the bytes that
//! get signed.

use crate::{jwk::Jwk, PayIdError};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The payment information published for a PayID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub verified_addresses: Vec<VerifiedAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl PaymentInformation {
    /// Creates an empty document for `pay_id`.
    pub fn new(pay_id: &str) -> Self {
        Self {
            pay_id: Some(pay_id.to_lowercase()),
            ..Default::default()
        }
    }

    /// Parses a PaymentInformation JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a well-formed document.
    pub fn from_json(json: &str) -> Result<Self, PayIdError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the document as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, PayIdError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the PayID if it is present and non-empty.
    pub fn pay_id(&self) -> Option<&str> {
        self.pay_id.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressDetailsType {
    #[serde(rename = "CryptoAddressDetails")]
    CryptoAddress,
    #[serde(rename = "AchAddressDetails")]
    AchAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressDetails {
    Crypto(CryptoAddressDetails),
    Ach(AchAddressDetails),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAddressDetails {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchAddressDetails {
    pub account_number: String,
    pub routing_number: String,
}

/// A single payment address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub payment_network: String,
    pub address_details_type: AddressDetailsType,
    pub address_details: AddressDetails,
}

impl Address {
    /// Creates a crypto address. Network and environment are upper-cased.
    pub fn crypto(
        payment_network: &str,
        environment: Option<&str>,
        address: &str,
        tag: Option<&str>,
    ) -> Self {
        Self {
            environment: environment.map(str::to_uppercase),
            payment_network: payment_network.to_uppercase(),
            address_details_type: AddressDetailsType::CryptoAddress,
            address_details: AddressDetails::Crypto(CryptoAddressDetails {
                address: address.to_owned(),
                tag: tag.map(str::to_owned),
            }),
        }
    }

    /// Returns the crypto address string, or the account number for ACH.
    pub fn address_string(&self) -> &str {
        match &self.address_details {
            AddressDetails::Crypto(details) => &details.address,
            AddressDetails::Ach(details) => &details.account_number,
        }
    }
}

/// The content that gets signed: an address bound to a PayID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedVerifiedAddress {
    pub pay_id: String,
    pub pay_id_address: Address,
}

impl UnsignedVerifiedAddress {
    /// Returns the canonical payload: compact JSON with members in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<String, PayIdError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A detached-payload JWS in general serialization. `payload` is carried
/// verbatim and is exactly the byte sequence that was signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAddress {
    pub payload: String,
    pub signatures: Vec<VerifiedAddressSignature>,
}

impl VerifiedAddress {
    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an [`UnsignedVerifiedAddress`].
    pub fn unsigned_address(&self) -> Result<UnsignedVerifiedAddress, PayIdError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAddressSignature {
    pub protected: String,
    pub signature: String,
}

/// The role of the key behind a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyName {
    IdentityKey,
    ServerKey,
}

impl KeyName {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyName::IdentityKey => "identityKey",
            KeyName::ServerKey => "serverKey",
        }
    }
}

impl std::fmt::Display for KeyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const JOSE_JSON_TYPE: &str = "JOSE+JSON";

/// Header parameters this implementation understands when listed in `crit`.
pub const UNDERSTOOD_CRITICAL_HEADERS: [&str; 2] = ["b64", "name"];

/// The decoded JWS protected header of a [`VerifiedAddressSignature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeaders {
    pub name: KeyName,
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
    pub jwk: Jwk,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProtectedHeaders {
    /// Builds the header for a new signature with an unencoded payload.
    pub fn new(name: KeyName, alg: &str, jwk: Jwk) -> Self {
        Self {
            name,
            alg: alg.to_owned(),
            typ: Some(JOSE_JSON_TYPE.to_owned()),
            b64: Some(false),
            crit: Some(
                UNDERSTOOD_CRITICAL_HEADERS
                    .iter()
                    .map(|s| (*s).to_owned())
                    .collect(),
            ),
            jwk,
            extra: Map::new(),
        }
    }

    /// Decodes the `protected` member of a signature. Both base64 alphabets
    /// are accepted, with or without padding.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::MalformedSignatureHeader`] if the value is not
    /// base64, not JSON, or lacks `name`, `alg` or `jwk`.
    pub fn decode(protected: &str) -> Result<Self, PayIdError> {
        let bytes = crate::jwk::decode_base64_lenient(protected)
            .map_err(|e| PayIdError::MalformedSignatureHeader(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PayIdError::MalformedSignatureHeader(e.to_string()))
    }

    /// Encodes the header as base64url (no padding) compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, PayIdError> {
        Ok(BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    /// Checks the unencoded-payload rules: `b64` is `false`, and `crit`
    /// lists `b64` and nothing this implementation does not understand.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::MalformedSignatureHeader`] describing the first
    /// violated rule.
    pub fn check_unencoded_payload(&self) -> Result<(), PayIdError> {
        if self.b64 != Some(false) {
            return Err(PayIdError::MalformedSignatureHeader(
                "b64 must be false".into(),
            ));
        }
        let crit = self.crit.as_deref().unwrap_or_default();
        if !crit.iter().any(|c| c == "b64") {
            return Err(PayIdError::MalformedSignatureHeader(
                "crit must include b64".into(),
            ));
        }
        if let Some(unknown) = crit
            .iter()
            .find(|c| !UNDERSTOOD_CRITICAL_HEADERS.contains(&c.as_str()))
        {
            return Err(PayIdError::MalformedSignatureHeader(format!(
                "unsupported critical header {unknown}"
            )));
        }
        Ok(())
    }
}
