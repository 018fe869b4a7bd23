#![no_main]

use libfuzzer_sys::fuzz_target;
use tiersearch::index::PostingList;

fuzz_target!(|data: &[u8]| {
    // Any length that is a multiple of the record size must round-trip
    if let Ok(list) = PostingList::decode(data) {
        assert_eq!(list.encode().len(), data.len());
    }
});
