// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use thiserror::Error;

/// Errors surfaced by construction-time operations (key loading, signing,
/// inspection preconditions). Verification never returns these to callers;
/// a rejected signature or chain is reported as `false`.
#[derive(Error, Debug)]
pub enum PayIdError {
    #[error("malformed key: {0}")]
    KeyFormat(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),
    #[error("no signing key provided")]
    NoSigningKey,
    #[error("payId property is empty")]
    MissingPayId,
    #[error("malformed signature header: {0}")]
    MalformedSignatureHeader(String),
    #[error("server key has no x5c certificate chain")]
    MissingCertificateChain,
    #[error("signature does not verify")]
    InvalidSignature,

    #[error(transparent)]
    Signature(#[from] signature::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
