//! Fuzz testing for the source page parser.
//!
//! Arbitrary bytes are padded or truncated to one page and pushed through
//! classification, header parsing, and the cell pointer array. Malformed
//! input must produce errors, never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;

use sos::config::PAGE_SIZE;
use sos::source::SourcePage;

fuzz_target!(|data: &[u8]| {
    let mut page = vec![0u8; PAGE_SIZE];
    let take = data.len().min(PAGE_SIZE);
    page[..take].copy_from_slice(&data[..take]);

    let view = match SourcePage::new(&page, 2) {
        Ok(view) => view,
        Err(_) => return,
    };

    let _ = view.kind();

    if let Ok(header) = view.header() {
        let _ = view.cell_offsets(&header);
    }
});
