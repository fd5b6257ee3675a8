//! Host bodies of the general simplex kernels
//!
//! Each function receives the launch geometry and walks its work items the way
//! a device would. Atomic minimum on the output scalar becomes a plain `min`
//! since work items run in order.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{Args, KernelFn, Memory};
use crate::bounds::{can_decrease, can_increase, is_broken};
use crate::error::{Error, Result};
use crate::runtime::LaunchSize;
use crate::runtime::kernels::{self as names, FLAG_BASIC, FLAG_NONBASIC, HAS_LOWER, HAS_UPPER};
use crate::solver::rules::Correction;

/// Skip rayon for small tableaus (overhead > benefit)
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Resolve an entry point name to its host body
pub(super) fn lookup(entry: &str) -> Option<KernelFn> {
    let func: KernelFn = match entry {
        names::CHECK_BOUNDS => check_bounds,
        names::FIND_SUITABLE => find_suitable,
        names::FIND_SUITABLE_COMPLETE => find_suitable_complete,
        names::PIVOT_UPDATE_INNER => pivot_update_inner,
        names::PIVOT_UPDATE_ROW => pivot_update_row,
        names::PIVOT_UPDATE_COLUMN => pivot_update_column,
        names::UPDATE_ASSIGNMENT => update_assignment,
        names::REDUCE_PARTIAL_SUMS => reduce_partial_sums,
        names::UPDATE_ASSIGNMENT_COMPLETE => update_assignment_complete,
        _ => return None,
    };
    Some(func)
}

// ============================================================================
// Helpers
// ============================================================================

/// Number of work items along `dim` after rounding up to whole workgroups
#[inline]
fn span(size: &LaunchSize, dim: usize) -> usize {
    size.groups()[dim] as usize * size.local[dim] as usize
}

fn need(args: &Args<'_>, what: &str, len: usize, required: usize) -> Result<()> {
    if len < required {
        return Err(Error::launch(
            args.entry(),
            format!("{what} holds {len} elements, kernel needs {required}"),
        ));
    }
    Ok(())
}

#[inline]
fn side(values: &[f32], mask: &[u32], bit: u32, var: usize) -> Option<f32> {
    (mask[var] & bit != 0).then(|| values[var])
}

/// Read-only bound columns shared by the check/find kernels
struct BoundView<'a> {
    lower: &'a [f32],
    upper: &'a [f32],
    bounded: &'a [u32],
}

impl BoundView<'_> {
    #[inline]
    fn lower(&self, var: usize) -> Option<f32> {
        side(self.lower, self.bounded, HAS_LOWER, var)
    }

    #[inline]
    fn upper(&self, var: usize) -> Option<f32> {
        side(self.upper, self.bounded, HAS_UPPER, var)
    }
}

/// Binary tree fold of a power-of-two shared array, as a workgroup would
fn tree_reduce(shared: &mut [f32]) -> f32 {
    let mut stride = shared.len() / 2;
    while stride > 0 {
        for i in 0..stride {
            shared[i] += shared[i + stride];
        }
        stride /= 2;
    }
    shared[0]
}

fn workgroup_width(args: &Args<'_>, size: &LaunchSize) -> Result<usize> {
    let local = size.local[0];
    if !local.is_power_of_two() {
        return Err(Error::launch(
            args.entry(),
            format!("reduction workgroup size {local} is not a power of two"),
        ));
    }
    Ok(local as usize)
}

/// Per-workgroup partial sums of `load(i)` for `i < count`, zero padded
fn partial_sums(
    args: &Args<'_>,
    size: &LaunchSize,
    count: usize,
    out: &mut [u32],
    load: impl Fn(usize) -> f32,
) -> Result<()> {
    let local = workgroup_width(args, size)?;
    let groups = size.groups()[0] as usize;
    need(args, "partial sum buffer", out.len(), groups)?;

    let mut shared = vec![0.0f32; local];
    for (group, slot) in out.iter_mut().take(groups).enumerate() {
        for (l, cell) in shared.iter_mut().enumerate() {
            let i = group * local + l;
            *cell = if i < count { load(i) } else { 0.0 };
        }
        *slot = tree_reduce(&mut shared).to_bits();
    }
    Ok(())
}

// ============================================================================
// Check / find
// ============================================================================

/// Lowest broken basic variable in `[offset, offset + span)`
fn check_bounds(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let num_vars = args.usize(0);
    let offset = args.usize(1);
    let epsilon = args.f32(2);

    mem.with_output(args.buffer(5), |mem, out| {
        let view = BoundView {
            lower: mem.floats(args.buffer(0))?,
            upper: mem.floats(args.buffer(1))?,
            bounded: mem.words(args.buffer(2))?,
        };
        let assigns = mem.floats(args.buffer(3))?;
        let flags = mem.words(args.buffer(4))?;
        need(args, "bound buffers", view.lower.len().min(view.upper.len()), num_vars)?;
        need(args, "assignment buffer", assigns.len().min(flags.len()), num_vars)?;
        need(args, "output", out.len(), 1)?;

        let end = (offset + span(size, 0)).min(num_vars);
        for var in offset..end {
            if flags[var] == FLAG_BASIC
                && is_broken(assigns[var], view.lower(var), view.upper(var), epsilon)
            {
                out[0] = out[0].min(var as u32);
            }
        }
        Ok(())
    })
}

/// Lowest suitable nonbasic variable in `[offset, offset + span)` for `broken`
fn find_suitable(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let num_vars = args.usize(0);
    let num_cols = args.usize(1);
    let broken = args.usize(2);
    let offset = args.usize(3);

    mem.with_output(args.buffer(7), |mem, out| {
        let tableau = mem.floats(args.buffer(0))?;
        let view = BoundView {
            lower: mem.floats(args.buffer(1))?,
            upper: mem.floats(args.buffer(2))?,
            bounded: mem.words(args.buffer(3))?,
        };
        let assigns = mem.floats(args.buffer(4))?;
        let flags = mem.words(args.buffer(5))?;
        let var_to_tableau = mem.words(args.buffer(6))?;
        need(args, "assignment buffer", assigns.len().min(flags.len()), num_vars)?;
        need(args, "var_to_tableau", var_to_tableau.len(), num_vars)?;
        need(args, "output", out.len(), 1)?;

        let row = var_to_tableau[broken] as usize;
        let correction =
            Correction::for_broken(assigns[broken], view.lower(broken), view.upper(broken));

        let end = (offset + span(size, 0)).min(num_vars);
        for var in offset..end {
            if flags[var] != FLAG_NONBASIC {
                continue;
            }
            let col = var_to_tableau[var] as usize;
            let coeff = tableau[row * num_cols + col];
            let increasable = can_increase(assigns[var], view.upper(var));
            let decreasable = can_decrease(assigns[var], view.lower(var));
            if correction.admits(coeff, increasable, decreasable) {
                out[0] = out[0].min(var as u32);
            }
        }
        Ok(())
    })
}

/// Single work item: apply the correction to the broken and suitable variables
fn find_suitable_complete(mem: &mut Memory, args: &Args<'_>, _size: &LaunchSize) -> Result<()> {
    let num_cols = args.usize(0);
    let broken = args.usize(1);
    let suitable = args.usize(2);

    mem.with_output(args.buffer(4), |mem, out| {
        let tableau = mem.floats(args.buffer(0))?;
        let view = BoundView {
            lower: mem.floats(args.buffer(1))?,
            upper: mem.floats(args.buffer(2))?,
            bounded: mem.words(args.buffer(3))?,
        };
        let var_to_tableau = mem.words(args.buffer(5))?;
        let assigns: &mut [f32] = bytemuck::cast_slice_mut(out);
        need(args, "assignment buffer", assigns.len(), broken.max(suitable) + 1)?;

        let row = var_to_tableau[broken] as usize;
        let col = var_to_tableau[suitable] as usize;
        let coeff = tableau[row * num_cols + col];
        let correction =
            Correction::for_broken(assigns[broken], view.lower(broken), view.upper(broken));

        let theta = correction.theta(coeff);
        assigns[suitable] = correction.shift(assigns[suitable], theta);
        assigns[broken] = correction.shift(assigns[broken], correction.delta);
        Ok(())
    })
}

// ============================================================================
// Pivot
// ============================================================================

/// `cell - (pivot_row[c] * cell_in_pivot_col) / alpha` outside the pivot row
/// and column. Grid: x = columns, y = rows.
fn pivot_update_inner(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let alpha = args.f32(0);
    let row = args.usize(1);
    let col = args.usize(2);
    let num_rows = args.usize(3);
    let num_cols = args.usize(4);
    if num_cols == 0 {
        return Ok(());
    }

    mem.with_output(args.buffer(0), |_, out| {
        let tableau: &mut [f32] = bytemuck::cast_slice_mut(out);
        need(args, "tableau", tableau.len(), num_rows * num_cols)?;

        let rows = span(size, 1).min(num_rows);
        let cols = span(size, 0).min(num_cols);
        let pivot_row = tableau[row * num_cols..(row + 1) * num_cols].to_vec();

        let update = |r: usize, cells: &mut [f32]| {
            if r == row {
                return;
            }
            let gamma = cells[col];
            for c in 0..cols {
                if c != col {
                    cells[c] -= (pivot_row[c] * gamma) / alpha;
                }
            }
        };

        let block = &mut tableau[..rows * num_cols];

        #[cfg(feature = "rayon")]
        if block.len() >= PARALLEL_THRESHOLD {
            block
                .par_chunks_mut(num_cols)
                .enumerate()
                .for_each(|(r, cells)| update(r, cells));
            return Ok(());
        }

        block
            .chunks_mut(num_cols)
            .enumerate()
            .for_each(|(r, cells)| update(r, cells));
        Ok(())
    })
}

/// `-cell / alpha` along the pivot row, pivot cell excluded
fn pivot_update_row(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let alpha = args.f32(0);
    let row = args.usize(1);
    let col = args.usize(2);
    let num_cols = args.usize(3);

    mem.with_output(args.buffer(0), |_, out| {
        let tableau: &mut [f32] = bytemuck::cast_slice_mut(out);
        need(args, "tableau", tableau.len(), (row + 1) * num_cols)?;
        let cells = &mut tableau[row * num_cols..(row + 1) * num_cols];
        for c in 0..span(size, 0).min(num_cols) {
            if c != col {
                cells[c] = -cells[c] / alpha;
            }
        }
        Ok(())
    })
}

/// `cell / alpha` down the pivot column, pivot cell excluded
fn pivot_update_column(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let alpha = args.f32(0);
    let row = args.usize(1);
    let col = args.usize(2);
    let num_rows = args.usize(3);
    let num_cols = args.usize(4);

    mem.with_output(args.buffer(0), |_, out| {
        let tableau: &mut [f32] = bytemuck::cast_slice_mut(out);
        need(args, "tableau", tableau.len(), num_rows * num_cols)?;
        for r in 0..span(size, 0).min(num_rows) {
            if r != row {
                let i = r * num_cols + col;
                tableau[i] /= alpha;
            }
        }
        Ok(())
    })
}

// ============================================================================
// Assignment update
// ============================================================================

/// Partial dot products of one row against the column variables' assignments
fn update_assignment(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let num_cols = args.usize(0);
    let row = args.usize(1);

    mem.with_output(args.buffer(3), |mem, out| {
        let tableau = mem.floats(args.buffer(0))?;
        let assigns = mem.floats(args.buffer(1))?;
        let col_to_var = mem.words(args.buffer(2))?;
        need(args, "tableau", tableau.len(), (row + 1) * num_cols)?;
        need(args, "col_to_var", col_to_var.len(), num_cols)?;

        let cells = &tableau[row * num_cols..(row + 1) * num_cols];
        partial_sums(args, size, num_cols, out, |c| {
            assigns[col_to_var[c] as usize] * cells[c]
        })
    })
}

/// Fold `count` partial sums into one per workgroup
fn reduce_partial_sums(mem: &mut Memory, args: &Args<'_>, size: &LaunchSize) -> Result<()> {
    let count = args.usize(0);

    mem.with_output(args.buffer(1), |mem, out| {
        let input = mem.floats(args.buffer(0))?;
        need(args, "partial sums", input.len(), count)?;
        partial_sums(args, size, count, out, |i| input[i])
    })
}

/// Single workgroup: fold the last partial sums into `assigns[var]`
fn update_assignment_complete(
    mem: &mut Memory,
    args: &Args<'_>,
    size: &LaunchSize,
) -> Result<()> {
    let count = args.usize(0);
    let var = args.usize(1);
    let local = workgroup_width(args, size)?;
    if count > local {
        return Err(Error::launch(
            args.entry(),
            format!("{count} partial sums do not fit one workgroup of {local}"),
        ));
    }

    mem.with_output(args.buffer(1), |mem, out| {
        let input = mem.floats(args.buffer(0))?;
        need(args, "partial sums", input.len(), count)?;
        need(args, "assignment buffer", out.len(), var + 1)?;

        let mut shared: Vec<f32> = (0..local)
            .map(|i| if i < count { input[i] } else { 0.0 })
            .collect();
        out[var] = tree_reduce(&mut shared).to_bits();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_reduce_order() {
        let mut shared = [1.0f32, 2.0, 3.0, 4.0];
        // (1 + 3) + (2 + 4)
        assert_eq!(tree_reduce(&mut shared), 10.0);
        let mut single = [5.0f32];
        assert_eq!(tree_reduce(&mut single), 5.0);
    }

    #[test]
    fn test_lookup_covers_all_kernels() {
        for entry in names::ALL_KERNELS {
            assert!(lookup(entry).is_some(), "{entry}");
        }
        assert!(lookup("missing").is_none());
    }
}
