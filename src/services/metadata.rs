// Advisory page counts for timing statistics.
//
// Nothing here may fail a job: unknown inputs report 0 units.

use crate::services::input::InputRef;
use regex::bytes::Regex;
use std::sync::LazyLock;

static PAGE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Page\b").expect("Invalid page object regex"));

/// Estimate how many units (pages) an input holds.
///
/// Images count as one page. PDFs are scanned for `/Type /Page` objects,
/// which excludes the `/Pages` tree nodes. Object streams hide page objects
/// from this scan, in which case the count is 0.
pub fn estimate_unit_count(input: &InputRef, bytes: &[u8]) -> u32 {
    if input.is_image() {
        return 1;
    }

    if !bytes.starts_with(b"%PDF") {
        tracing::debug!("{} does not look like a PDF, page count unknown", input.display_name);
        return 0;
    }

    let count = PAGE_OBJECT.find_iter(bytes).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
