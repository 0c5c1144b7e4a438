//! Upload-time bucket placement.

use crate::models::bucket::Bucket;

/// `"working"` (any case) goes to [`Bucket::Working`]; every other category,
/// including an empty one, goes to [`Bucket::Stable`].
pub fn route(lifecycle_category: &str) -> Bucket {
    if lifecycle_category.eq_ignore_ascii_case(Bucket::Working.label()) {
        Bucket::Working
    } else {
        Bucket::Stable
    }
}
