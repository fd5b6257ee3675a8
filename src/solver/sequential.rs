//! Sequential backend: host bounds and nested loops over the dense tableau

use std::collections::BTreeSet;

use super::Backend;
use super::rules::Correction;
use crate::bounds::{Bounds, HostBounds, Role};
use crate::error::Result;
use crate::tableau::{IndexMap, Tableau};

/// Backend running every operation on the calling thread
///
/// Basic and nonbasic variables are kept in ordered sets, so scans visit
/// variables in ascending index order and the earliest candidate wins.
#[derive(Clone, Debug)]
pub struct SequentialBackend {
    bounds: HostBounds,
    basic: BTreeSet<usize>,
    nonbasic: BTreeSet<usize>,
}

impl SequentialBackend {
    /// Backend for `max_rows` slack variables and `num_cols` problem variables
    pub fn new(max_rows: usize, num_cols: usize, epsilon: f32) -> Self {
        Self {
            bounds: HostBounds::new(max_rows, num_cols, epsilon),
            basic: (num_cols..num_cols + max_rows).collect(),
            nonbasic: (0..num_cols).collect(),
        }
    }

    /// Host bound storage
    pub fn host_bounds(&self) -> &HostBounds {
        &self.bounds
    }
}

impl Backend for SequentialBackend {
    fn name(&self) -> String {
        "sequential".to_string()
    }

    fn bounds(&self) -> &dyn Bounds {
        &self.bounds
    }

    fn bounds_mut(&mut self) -> &mut dyn Bounds {
        &mut self.bounds
    }

    fn prepare(&mut self, _tableau: &Tableau, _map: &IndexMap) -> Result<()> {
        Ok(())
    }

    fn check_bounds(&mut self, _map: &IndexMap) -> Result<Option<usize>> {
        for &var in &self.basic {
            if self.bounds.is_broken(var)? {
                return Ok(Some(var));
            }
        }
        Ok(None)
    }

    fn find_suitable(
        &mut self,
        tableau: &Tableau,
        map: &IndexMap,
        broken: usize,
    ) -> Result<Option<usize>> {
        let correction = Correction::for_broken(
            self.bounds.assignment(broken)?,
            self.bounds.lower(broken)?,
            self.bounds.upper(broken)?,
        );
        let row = map.position(broken);

        for &var in &self.nonbasic {
            let coeff = tableau.get(row, map.position(var))?;
            let increasable = self.bounds.is_increasable(var)?;
            let decreasable = self.bounds.is_decreasable(var)?;
            if correction.admits(coeff, increasable, decreasable) {
                correction.apply(&mut self.bounds, var, broken, coeff)?;
                return Ok(Some(var));
            }
        }
        Ok(None)
    }

    fn pivot(
        &mut self,
        tableau: &mut Tableau,
        map: &mut IndexMap,
        leaving: usize,
        entering: usize,
    ) -> Result<()> {
        let row = map.position(leaving);
        let col = map.position(entering);
        let num_rows = tableau.num_rows();
        let num_cols = tableau.num_cols();
        let cells = tableau.as_mut_slice();

        let pivot = row * num_cols + col;
        let alpha = cells[pivot];

        for i in (0..num_rows).filter(|&i| i != row) {
            let gamma = cells[i * num_cols + col];
            for j in (0..num_cols).filter(|&j| j != col) {
                let beta = cells[row * num_cols + j];
                let idx = i * num_cols + j;
                cells[idx] -= (beta * gamma) / alpha;
            }
        }
        for j in (0..num_cols).filter(|&j| j != col) {
            let idx = row * num_cols + j;
            cells[idx] = -cells[idx] / alpha;
        }
        for i in (0..num_rows).filter(|&i| i != row) {
            cells[i * num_cols + col] /= alpha;
        }
        cells[pivot] = 1.0 / alpha;

        map.swap(leaving, entering);
        self.basic.remove(&leaving);
        self.nonbasic.remove(&entering);
        self.basic.insert(entering);
        self.nonbasic.insert(leaving);
        self.bounds.set_role(leaving, Role::Nonbasic)?;
        self.bounds.set_role(entering, Role::Basic)?;
        Ok(())
    }

    fn update_assignment(&mut self, tableau: &Tableau, map: &IndexMap) -> Result<()> {
        for row in 0..tableau.num_rows() {
            let assigns = self.bounds.assignment_slice();
            let value = tableau
                .row(row)
                .iter()
                .enumerate()
                .fold(0.0f32, |acc, (col, &coeff)| {
                    acc + assigns[map.col_var(col)] * coeff
                });
            self.bounds.set_assignment(map.row_var(row), value)?;
        }
        Ok(())
    }

    fn tableau_entry(&self, tableau: &Tableau, row: usize, col: usize) -> Result<f32> {
        tableau.get(row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::DEFAULT_EPSILON;

    fn two_by_two() -> (SequentialBackend, Tableau, IndexMap) {
        let mut tableau = Tableau::new(2, 2);
        tableau.add_row(&[2.0, 1.0]).unwrap();
        tableau.add_row(&[1.0, 3.0]).unwrap();
        (
            SequentialBackend::new(2, 2, DEFAULT_EPSILON),
            tableau,
            IndexMap::new(2, 2),
        )
    }

    #[test]
    fn test_pivot_arithmetic() {
        let (mut backend, mut tableau, mut map) = two_by_two();
        backend.pivot(&mut tableau, &mut map, 2, 0).unwrap();
        // row0: x0 = s0/2 - x1/2 ; row1: s1 = s0/2 + (3 - 1/2) x1
        assert_eq!(tableau.row(0), &[0.5, -0.5]);
        assert_eq!(tableau.row(1), &[0.5, 2.5]);
        assert_eq!(map.row_var(0), 0);
        assert_eq!(map.col_var(0), 2);
        assert_eq!(backend.bounds.role(0).unwrap(), Role::Basic);
        assert_eq!(backend.bounds.role(2).unwrap(), Role::Nonbasic);
        assert!(backend.basic.contains(&0) && backend.nonbasic.contains(&2));
    }

    #[test]
    fn test_update_assignment_full_recompute() {
        let (mut backend, tableau, map) = two_by_two();
        backend.bounds.set_assignment(0, 1.0).unwrap();
        backend.bounds.set_assignment(1, 2.0).unwrap();
        backend.update_assignment(&tableau, &map).unwrap();
        assert_eq!(backend.bounds.assignment(2).unwrap(), 4.0);
        assert_eq!(backend.bounds.assignment(3).unwrap(), 7.0);
    }

    #[test]
    fn test_check_and_find_lowest_index() {
        let (mut backend, tableau, map) = two_by_two();
        backend.bounds.set_lower(2, Some(4.0)).unwrap();
        backend.bounds.set_lower(3, Some(1.0)).unwrap();
        assert_eq!(backend.check_bounds(&map).unwrap(), Some(2));

        assert_eq!(backend.find_suitable(&tableau, &map, 2).unwrap(), Some(0));
        assert_eq!(backend.bounds.assignment(0).unwrap(), 2.0);
        assert_eq!(backend.bounds.assignment(2).unwrap(), 4.0);
    }

    #[test]
    fn test_find_none_when_blocked() {
        let (mut backend, tableau, map) = two_by_two();
        backend.bounds.set_lower(2, Some(4.0)).unwrap();
        backend.bounds.set_bounds(0, Some(0.0), Some(0.0)).unwrap();
        backend.bounds.set_bounds(1, Some(0.0), Some(0.0)).unwrap();
        assert_eq!(backend.find_suitable(&tableau, &map, 2).unwrap(), None);
        assert_eq!(backend.bounds.assignment(2).unwrap(), 0.0);
    }
}
