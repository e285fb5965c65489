// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! This crate signs, verifies, and inspects verifiable PayID payment addresses.
//!
//! # Verified addresses
//!
//! A PayID document ([`PaymentInformation`]) maps a PayID such as
//! `alice$payid.example` to payment addresses. A [`VerifiedAddress`] binds one
//! address to the PayID with one or more signatures, encoded as a General JSON
//! JWS with an unencoded payload ([RFC 7797](https://www.rfc-editor.org/rfc/rfc7797)):
//!
//! ```text
//! signing input = BASE64URL(protected header) || '.' || payload
//! ```
//!
//! Each protected header carries the signer's public key as a JWK and names
//! its role ([`KeyName`]). An `identityKey` is the PayID owner's own key. A
//! `serverKey` is held by the hosting server and is certified by an X.509
//! chain in the JWK's `x5c` member, which must lead to a trusted root and
//! whose leaf must certify the embedded key.
//!
//! ## Signing
//!
//! Keys are loaded with [`signing_key_from_pem`] or [`KeyHandle::from_jwk`] and
//! wrapped in [`IdentityKeySigningParams`] or [`ServerKeySigningParams`].
//! [`sign_with_keys`] produces one signature per key over a shared payload.
//!
//! ## Verifying
//!
//! [`verify_pay_id`] checks every verified address of a document against the
//! document's PayID. Certificate chains are checked when a
//! [`CertificateChainValidator`] is supplied through [`ChainCheck::Enforce`].
//! A verified address with no signatures is never verified. Symmetric (`oct`)
//! keys never verify since the key material cannot be published.
//!
//! ## Inspecting
//!
//! [`PaymentInformationInspector`] reports signature validity and chain
//! validity separately for every signature, along with key and certificate
//! details, for display to a user.

mod chain;
mod error;
mod files;
mod inspect;
mod jwk;
mod keys;
mod model;
mod signing;
mod verify;

pub use chain::*;
pub use error::*;
pub use files::*;
pub use inspect::*;
pub use jwk::{decode_base64_lenient, Jwk};
pub use keys::*;
pub use model::*;
pub use signing::*;
pub use verify::*;
