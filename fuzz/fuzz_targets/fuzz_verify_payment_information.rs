// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

#![no_main]

use libfuzzer_sys::fuzz_target;
use verifiable_payid::{verify_pay_id_json, ChainCheck};

fuzz_target!(|data: &str| {
    let _ = verify_pay_id_json(data, ChainCheck::Skip);
});
