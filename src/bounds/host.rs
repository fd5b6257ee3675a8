//! Host-resident bounds

use super::{Bounds, DEFAULT_EPSILON, Role, can_decrease, can_increase, is_broken};
use crate::error::{Error, Result};

/// Bounds, assignments and roles held in host vectors
#[derive(Clone, Debug)]
pub struct HostBounds {
    lower: Vec<Option<f32>>,
    upper: Vec<Option<f32>>,
    assigns: Vec<f32>,
    roles: Vec<Role>,
    epsilon: f32,
}

impl HostBounds {
    /// Create bounds for `num_nonbasic` problem variables followed by
    /// `num_basic` slack variables.
    ///
    /// Every variable starts with lower bound `0`, no upper bound and
    /// assignment `0`.
    pub fn new(num_basic: usize, num_nonbasic: usize, epsilon: f32) -> Self {
        let num_vars = num_basic + num_nonbasic;
        let roles = (0..num_vars)
            .map(|v| {
                if v < num_nonbasic {
                    Role::Nonbasic
                } else {
                    Role::Basic
                }
            })
            .collect();
        Self {
            lower: vec![Some(0.0); num_vars],
            upper: vec![None; num_vars],
            assigns: vec![0.0; num_vars],
            roles,
            epsilon,
        }
    }

    /// Tolerance used by [`Bounds::is_broken`]
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// All lower bounds, indexed by variable
    pub fn lower_bounds(&self) -> &[Option<f32>] {
        &self.lower
    }

    /// All upper bounds, indexed by variable
    pub fn upper_bounds(&self) -> &[Option<f32>] {
        &self.upper
    }

    /// All assignments, indexed by variable
    pub fn assignment_slice(&self) -> &[f32] {
        &self.assigns
    }

    /// All roles, indexed by variable
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    #[inline]
    fn check(&self, var: usize) -> Result<()> {
        Error::check_index(var, self.assigns.len())
    }
}

impl Default for HostBounds {
    fn default() -> Self {
        Self::new(0, 0, DEFAULT_EPSILON)
    }
}

impl Bounds for HostBounds {
    fn num_vars(&self) -> usize {
        self.assigns.len()
    }

    fn lower(&self, var: usize) -> Result<Option<f32>> {
        self.check(var)?;
        Ok(self.lower[var])
    }

    fn upper(&self, var: usize) -> Result<Option<f32>> {
        self.check(var)?;
        Ok(self.upper[var])
    }

    fn set_lower(&mut self, var: usize, lower: Option<f32>) -> Result<()> {
        self.check(var)?;
        self.lower[var] = lower;
        Ok(())
    }

    fn set_upper(&mut self, var: usize, upper: Option<f32>) -> Result<()> {
        self.check(var)?;
        self.upper[var] = upper;
        Ok(())
    }

    fn assignment(&self, var: usize) -> Result<f32> {
        self.check(var)?;
        Ok(self.assigns[var])
    }

    fn set_assignment(&mut self, var: usize, value: f32) -> Result<()> {
        self.check(var)?;
        self.assigns[var] = value;
        Ok(())
    }

    fn assignments(&self, count: usize) -> Result<Vec<f32>> {
        if count > self.assigns.len() {
            return Err(Error::IndexOutOfBounds {
                index: count,
                size: self.assigns.len(),
            });
        }
        Ok(self.assigns[..count].to_vec())
    }

    fn role(&self, var: usize) -> Result<Role> {
        self.check(var)?;
        Ok(self.roles[var])
    }

    fn set_role(&mut self, var: usize, role: Role) -> Result<()> {
        self.check(var)?;
        self.roles[var] = role;
        Ok(())
    }

    fn is_broken(&self, var: usize) -> Result<bool> {
        self.check(var)?;
        Ok(is_broken(
            self.assigns[var],
            self.lower[var],
            self.upper[var],
            self.epsilon,
        ))
    }

    fn is_increasable(&self, var: usize) -> Result<bool> {
        self.check(var)?;
        Ok(can_increase(self.assigns[var], self.upper[var]))
    }

    fn is_decreasable(&self, var: usize) -> Result<bool> {
        self.check(var)?;
        Ok(can_decrease(self.assigns[var], self.lower[var]))
    }

    fn increase_assignment(&mut self, var: usize, delta: f32) -> Result<()> {
        self.check(var)?;
        self.assigns[var] += delta;
        Ok(())
    }

    fn decrease_assignment(&mut self, var: usize, delta: f32) -> Result<()> {
        self.check(var)?;
        self.assigns[var] -= delta;
        Ok(())
    }
}
