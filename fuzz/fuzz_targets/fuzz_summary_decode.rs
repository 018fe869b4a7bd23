#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Must reject bad lengths and negative counts without panicking
    let _ = tiersearch::index::summary::decode(data);
});
