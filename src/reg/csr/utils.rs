//! Small bit-range helpers used by [`super::state::State`].

use core::ops::{Bound, Range, RangeBounds};

/// Convert any `RangeBounds<usize>` (as accepted by `read_bits`/`write_bits`)
/// into a concrete half-open `Range`, resolving unbounded ends against
/// `bit_length`.
pub fn to_range<T: RangeBounds<usize>>(generic_range: &T, bit_length: usize) -> Range<usize> {
    let start = match generic_range.start_bound() {
        Bound::Excluded(&val) => val + 1,
        Bound::Included(&val) => val,
        Bound::Unbounded => 0,
    };
    let end = match generic_range.end_bound() {
        Bound::Excluded(&val) => val,
        Bound::Included(&val) => val + 1,
        Bound::Unbounded => bit_length,
    };

    start..end
}
