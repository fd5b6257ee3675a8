//! Kernel names and device-side encodings shared by every kernel source
//!
//! Each entry point takes its scalar arguments first, then its buffers, in the
//! order listed next to the name below. All device families use the same
//! layout, so the parallel backend binds arguments without knowing which
//! family it is talking to.

/// `num_vars, offset, epsilon | lower, upper, bounded, assigns, flags, output`
pub const CHECK_BOUNDS: &str = "check_bounds";

/// `num_vars, num_cols, broken, offset | tableau, lower, upper, bounded,
/// assigns, flags, var_to_tableau, output`
pub const FIND_SUITABLE: &str = "find_suitable";

/// `num_cols, broken, suitable | tableau, lower, upper, bounded, assigns,
/// var_to_tableau`
pub const FIND_SUITABLE_COMPLETE: &str = "find_suitable_complete";

/// `alpha, row, col, num_rows, num_cols | tableau`
pub const PIVOT_UPDATE_INNER: &str = "pivot_update_inner";

/// `alpha, row, col, num_cols | tableau`
pub const PIVOT_UPDATE_ROW: &str = "pivot_update_row";

/// `alpha, row, col, num_rows, num_cols | tableau`
pub const PIVOT_UPDATE_COLUMN: &str = "pivot_update_column";

/// `num_cols, row | tableau, assigns, col_to_var, partials_out`
pub const UPDATE_ASSIGNMENT: &str = "update_assignment";

/// `count | partials_in, partials_out`
pub const REDUCE_PARTIAL_SUMS: &str = "reduce_partial_sums";

/// `count, var | partials_in, assigns`
pub const UPDATE_ASSIGNMENT_COMPLETE: &str = "update_assignment_complete";

/// Every entry point of the general simplex kernel source
pub const ALL_KERNELS: [&str; 9] = [
    CHECK_BOUNDS,
    FIND_SUITABLE,
    FIND_SUITABLE_COMPLETE,
    PIVOT_UPDATE_INNER,
    PIVOT_UPDATE_ROW,
    PIVOT_UPDATE_COLUMN,
    UPDATE_ASSIGNMENT,
    REDUCE_PARTIAL_SUMS,
    UPDATE_ASSIGNMENT_COMPLETE,
];

/// Role flag of a nonbasic variable
pub const FLAG_NONBASIC: u32 = 0;
/// Role flag of a basic variable
pub const FLAG_BASIC: u32 = 1;

/// Bound mask bit: the lower bound is set
pub const HAS_LOWER: u32 = 1;
/// Bound mask bit: the upper bound is set
pub const HAS_UPPER: u32 = 2;

/// Widest workgroup any kernel source is written for (shared-memory arrays
/// are sized to this).
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// Number of scalar arguments each entry point takes
pub fn scalar_count(entry: &str) -> Option<usize> {
    match entry {
        CHECK_BOUNDS => Some(3),
        FIND_SUITABLE => Some(4),
        FIND_SUITABLE_COMPLETE => Some(3),
        PIVOT_UPDATE_INNER => Some(5),
        PIVOT_UPDATE_ROW => Some(4),
        PIVOT_UPDATE_COLUMN => Some(5),
        UPDATE_ASSIGNMENT => Some(2),
        REDUCE_PARTIAL_SUMS => Some(1),
        UPDATE_ASSIGNMENT_COMPLETE => Some(2),
        _ => None,
    }
}

/// Number of buffer arguments each entry point takes
pub fn buffer_count(entry: &str) -> Option<usize> {
    match entry {
        CHECK_BOUNDS => Some(6),
        FIND_SUITABLE => Some(8),
        FIND_SUITABLE_COMPLETE => Some(6),
        PIVOT_UPDATE_INNER | PIVOT_UPDATE_ROW | PIVOT_UPDATE_COLUMN => Some(1),
        UPDATE_ASSIGNMENT => Some(4),
        REDUCE_PARTIAL_SUMS | UPDATE_ASSIGNMENT_COMPLETE => Some(2),
        _ => None,
    }
}

/// Encode optional bounds as a `HAS_LOWER | HAS_UPPER` mask
#[inline]
pub fn bound_mask(lower: Option<f32>, upper: Option<f32>) -> u32 {
    let mut mask = 0;
    if lower.is_some() {
        mask |= HAS_LOWER;
    }
    if upper.is_some() {
        mask |= HAS_UPPER;
    }
    mask
}

/// Largest power of two not above `n` (`n >= 1`)
#[inline]
pub fn floor_pow2(n: u32) -> u32 {
    if n == 0 { 1 } else { 1 << (31 - n.leading_zeros()) }
}
