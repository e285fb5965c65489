// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

#![no_main]

use libfuzzer_sys::fuzz_target;
use verifiable_payid::{extract_x5c_certificates, KeyHandle, ProtectedHeaders};

fuzz_target!(|data: &str| {
    if let Ok(headers) = ProtectedHeaders::decode(data) {
        let _ = headers.check_unencoded_payload();
        let _ = KeyHandle::from_jwk(&headers.jwk.to_public_only());
        let _ = extract_x5c_certificates(&headers);
    }
});
