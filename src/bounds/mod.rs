//! Per-variable bound bookkeeping
//!
//! Every variable carries an optional lower bound, an optional upper bound,
//! a current assignment and a [`Role`]. Unbounded sides are `None`, never a
//! sentinel value. Two stores implement [`Bounds`]:
//!
//! - [`HostBounds`]: plain vectors, supports the full predicate set
//! - [`DeviceBounds`]: device buffers behind a [`KernelManager`](crate::runtime::KernelManager),
//!   single-value reads and writes only
//!
//! The predicates are also exposed as free functions so host kernels evaluate
//! exactly the same comparisons as the sequential backend.

mod device;
mod host;

pub use device::DeviceBounds;
pub use host::HostBounds;

use crate::error::Result;
use crate::runtime::kernels::{FLAG_BASIC, FLAG_NONBASIC};

/// Tolerance used by [`is_broken`] unless configured otherwise
pub const DEFAULT_EPSILON: f32 = 1e-6;

/// Whether a variable currently owns a tableau row or a column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Occupies a tableau row; its value is derived from the nonbasic ones
    Basic,
    /// Occupies a tableau column; set directly within its bounds
    Nonbasic,
}

impl Role {
    /// Device encoding of the role
    #[inline]
    pub fn flag(self) -> u32 {
        match self {
            Role::Basic => FLAG_BASIC,
            Role::Nonbasic => FLAG_NONBASIC,
        }
    }

    /// Decode a device role flag; anything but `FLAG_BASIC` is nonbasic
    #[inline]
    pub fn from_flag(flag: u32) -> Self {
        if flag == FLAG_BASIC {
            Role::Basic
        } else {
            Role::Nonbasic
        }
    }
}

/// Storage of bounds, assignments and roles for a fixed set of variables
///
/// Every accessor is fallible: indices are checked, and device-resident
/// stores may fail on transfer or refuse predicate evaluation.
pub trait Bounds: Send {
    /// Number of variables held
    fn num_vars(&self) -> usize;

    /// Lower bound of `var`, `None` if unbounded below
    fn lower(&self, var: usize) -> Result<Option<f32>>;

    /// Upper bound of `var`, `None` if unbounded above
    fn upper(&self, var: usize) -> Result<Option<f32>>;

    /// Set or clear the lower bound of `var`
    fn set_lower(&mut self, var: usize, lower: Option<f32>) -> Result<()>;

    /// Set or clear the upper bound of `var`
    fn set_upper(&mut self, var: usize, upper: Option<f32>) -> Result<()>;

    /// Set both bounds. No `lower <= upper` check is made.
    fn set_bounds(&mut self, var: usize, lower: Option<f32>, upper: Option<f32>) -> Result<()> {
        self.set_lower(var, lower)?;
        self.set_upper(var, upper)
    }

    /// Current assignment of `var`
    fn assignment(&self, var: usize) -> Result<f32>;

    /// Overwrite the assignment of `var`
    fn set_assignment(&mut self, var: usize, value: f32) -> Result<()>;

    /// Assignments of variables `0..count` in ascending order
    fn assignments(&self, count: usize) -> Result<Vec<f32>> {
        (0..count).map(|var| self.assignment(var)).collect()
    }

    /// Current role of `var`
    fn role(&self, var: usize) -> Result<Role>;

    /// Change the role of `var`
    fn set_role(&mut self, var: usize, role: Role) -> Result<()>;

    /// Whether basic variable `var` violates a bound beyond the tolerance
    fn is_broken(&self, var: usize) -> Result<bool>;

    /// Whether `var` may still move up
    fn is_increasable(&self, var: usize) -> Result<bool>;

    /// Whether `var` may still move down
    fn is_decreasable(&self, var: usize) -> Result<bool>;

    /// `a[var] += delta`
    fn increase_assignment(&mut self, var: usize, delta: f32) -> Result<()>;

    /// `a[var] -= delta`
    fn decrease_assignment(&mut self, var: usize, delta: f32) -> Result<()>;
}

/// Bound violation test with tolerance on the bounded sides only.
///
/// An assignment within `eps` of either bound is never broken, even when it
/// lies on the wrong side of it.
#[inline]
pub fn is_broken(assignment: f32, lower: Option<f32>, upper: Option<f32>, eps: f32) -> bool {
    if lower.is_some_and(|lo| (assignment - lo).abs() < eps) {
        return false;
    }
    if upper.is_some_and(|hi| (assignment - hi).abs() < eps) {
        return false;
    }
    lower.is_some_and(|lo| assignment < lo) || upper.is_some_and(|hi| assignment > hi)
}

/// Strictly below the upper bound, or unbounded above
#[inline]
pub fn can_increase(assignment: f32, upper: Option<f32>) -> bool {
    upper.is_none_or(|hi| assignment < hi)
}

/// Strictly above the lower bound, or unbounded below
#[inline]
pub fn can_decrease(assignment: f32, lower: Option<f32>) -> bool {
    lower.is_none_or(|lo| assignment > lo)
}
