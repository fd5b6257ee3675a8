//! Dense tableau and the variable/position bookkeeping
//!
//! The tableau is a row-major `max_rows x num_cols` matrix. Row `r` expresses
//! the basic variable occupying it as a linear combination of the nonbasic
//! variables occupying the columns. [`IndexMap`] keeps the three mappings
//! between variable ids and physical positions.

use crate::error::{Error, Result};

/// Dense row-major coefficient matrix with a fixed row capacity
#[derive(Clone, Debug, PartialEq)]
pub struct Tableau {
    data: Vec<f32>,
    max_rows: usize,
    num_rows: usize,
    num_cols: usize,
}

impl Tableau {
    /// Create an empty tableau with room for `max_rows` rows of `num_cols`
    /// coefficients each.
    pub fn new(max_rows: usize, num_cols: usize) -> Self {
        Self {
            data: vec![0.0; max_rows * num_cols],
            max_rows,
            num_rows: 0,
            num_cols,
        }
    }

    /// Append a row
    ///
    /// Fails if `coeffs` does not hold exactly one coefficient per column or
    /// every row is already occupied.
    pub fn add_row(&mut self, coeffs: &[f32]) -> Result<usize> {
        if coeffs.len() != self.num_cols {
            return Err(Error::ConstraintWidth {
                expected: self.num_cols,
                got: coeffs.len(),
            });
        }
        if self.num_rows >= self.max_rows {
            return Err(Error::CapacityExceeded {
                capacity: self.max_rows,
            });
        }
        let row = self.num_rows;
        let start = row * self.num_cols;
        self.data[start..start + self.num_cols].copy_from_slice(coeffs);
        self.num_rows += 1;
        Ok(row)
    }

    /// Number of occupied rows
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Row capacity
    #[inline]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Number of columns
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Coefficient at `(row, col)`; any row below the capacity may be read
    pub fn get(&self, row: usize, col: usize) -> Result<f32> {
        Error::check_index(row, self.max_rows)?;
        Error::check_index(col, self.num_cols)?;
        Ok(self.data[row * self.num_cols + col])
    }

    /// One row of coefficients
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.num_cols;
        &self.data[start..start + self.num_cols]
    }

    /// The whole matrix, row-major, including unoccupied rows
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the whole matrix
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Bijections between variable ids and tableau rows/columns
///
/// Outside a pivot, `var_to_tableau[col_to_var[c]] == c` for every column and
/// `var_to_tableau[row_to_var[r]] == r` for every row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMap {
    col_to_var: Vec<u32>,
    row_to_var: Vec<u32>,
    var_to_tableau: Vec<u32>,
}

impl IndexMap {
    /// Initial layout: variable `i < num_cols` in column `i`, slack `j` (variable
    /// `num_cols + j`) in row `j`.
    pub fn new(max_rows: usize, num_cols: usize) -> Self {
        let col_to_var = (0..num_cols as u32).collect();
        let row_to_var = (0..max_rows as u32).map(|r| r + num_cols as u32).collect();
        let var_to_tableau = (0..num_cols as u32).chain(0..max_rows as u32).collect();
        Self {
            col_to_var,
            row_to_var,
            var_to_tableau,
        }
    }

    /// Variable occupying column `col`
    #[inline]
    pub fn col_var(&self, col: usize) -> usize {
        self.col_to_var[col] as usize
    }

    /// Variable occupying row `row`
    #[inline]
    pub fn row_var(&self, row: usize) -> usize {
        self.row_to_var[row] as usize
    }

    /// Row (basic) or column (nonbasic) position of `var`
    #[inline]
    pub fn position(&self, var: usize) -> usize {
        self.var_to_tableau[var] as usize
    }

    /// Column-to-variable array, device layout
    pub fn col_to_var(&self) -> &[u32] {
        &self.col_to_var
    }

    /// Row-to-variable array, device layout
    pub fn row_to_var(&self) -> &[u32] {
        &self.row_to_var
    }

    /// Variable-to-position array, device layout
    pub fn var_to_tableau(&self) -> &[u32] {
        &self.var_to_tableau
    }

    /// Exchange basic `leaving` (in a row) with nonbasic `entering` (in a
    /// column). Returns the `(row, col)` that was pivoted on.
    pub fn swap(&mut self, leaving: usize, entering: usize) -> (usize, usize) {
        let row = self.position(leaving);
        let col = self.position(entering);
        self.row_to_var[row] = entering as u32;
        self.col_to_var[col] = leaving as u32;
        self.var_to_tableau[leaving] = col as u32;
        self.var_to_tableau[entering] = row as u32;
        (row, col)
    }

    /// Check both bijection directions
    pub fn is_consistent(&self) -> bool {
        let cols_ok = self
            .col_to_var
            .iter()
            .enumerate()
            .all(|(c, &v)| self.var_to_tableau.get(v as usize) == Some(&(c as u32)));
        let rows_ok = self
            .row_to_var
            .iter()
            .enumerate()
            .all(|(r, &v)| self.var_to_tableau.get(v as usize) == Some(&(r as u32)));
        cols_ok && rows_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_row_width_and_capacity() {
        let mut tableau = Tableau::new(2, 3);
        assert!(matches!(
            tableau.add_row(&[1.0, 2.0]),
            Err(Error::ConstraintWidth {
                expected: 3,
                got: 2
            })
        ));
        assert_eq!(tableau.add_row(&[1.0, 2.0, 3.0]).unwrap(), 0);
        assert_eq!(tableau.add_row(&[4.0, 5.0, 6.0]).unwrap(), 1);
        assert!(matches!(
            tableau.add_row(&[7.0, 8.0, 9.0]),
            Err(Error::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(tableau.num_rows(), 2);
        assert_eq!(tableau.get(1, 2).unwrap(), 6.0);
        assert_eq!(tableau.row(0), &[1.0, 2.0, 3.0]);
        assert!(tableau.get(2, 0).is_err());
    }

    #[test]
    fn test_initial_layout() {
        let map = IndexMap::new(2, 3);
        assert_eq!(map.col_to_var(), &[0, 1, 2]);
        assert_eq!(map.row_to_var(), &[3, 4]);
        assert_eq!(map.var_to_tableau(), &[0, 1, 2, 0, 1]);
        assert!(map.is_consistent());
    }

    #[test]
    fn test_swap_keeps_bijection() {
        let mut map = IndexMap::new(2, 2);
        assert_eq!(map.swap(3, 1), (1, 1));
        assert_eq!(map.row_var(1), 1);
        assert_eq!(map.col_var(1), 3);
        assert_eq!(map.position(3), 1);
        assert!(map.is_consistent());
        assert_eq!(map.swap(2, 3), (0, 1));
        assert!(map.is_consistent());
    }
}
