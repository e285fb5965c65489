// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

#![no_main]

use libfuzzer_sys::fuzz_target;
use verifiable_payid::{jwk_or_cert_chain_from_str, signing_key_from_pem};

fuzz_target!(|data: &str| {
    let _ = signing_key_from_pem(data);
    let _ = jwk_or_cert_chain_from_str(data);
});
