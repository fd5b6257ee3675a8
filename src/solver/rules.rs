//! Correction rule for a broken basic variable
//!
//! Shared by the sequential backend and the host kernels so both pick the same
//! entering variable and apply bit-identical assignment shifts.

use crate::bounds::Bounds;
use crate::error::Result;

/// Which way the broken variable must move
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Below its lower bound
    Increase,
    /// Above its upper bound
    Decrease,
}

/// Direction and distance needed to bring a broken variable back to its
/// violated bound
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correction {
    /// Movement direction
    pub direction: Direction,
    /// Non-negative distance to the violated bound
    pub delta: f32,
}

impl Correction {
    /// Correction for a broken variable. Increase when a lower bound exists and
    /// the assignment is below it, otherwise decrease towards the upper bound.
    pub fn for_broken(assignment: f32, lower: Option<f32>, upper: Option<f32>) -> Self {
        match lower {
            Some(lo) if assignment < lo => Self {
                direction: Direction::Increase,
                delta: lo - assignment,
            },
            _ => Self {
                direction: Direction::Decrease,
                delta: upper.map_or(0.0, |hi| assignment - hi),
            },
        }
    }

    /// Whether a nonbasic candidate with row coefficient `coeff` can absorb
    /// the correction.
    #[inline]
    pub fn admits(&self, coeff: f32, increasable: bool, decreasable: bool) -> bool {
        match self.direction {
            Direction::Increase => (increasable && coeff > 0.0) || (decreasable && coeff < 0.0),
            Direction::Decrease => (increasable && coeff < 0.0) || (decreasable && coeff > 0.0),
        }
    }

    /// Amount the entering variable moves, signed by the coefficient
    #[inline]
    pub fn theta(&self, coeff: f32) -> f32 {
        self.delta / coeff
    }

    /// Move `value` by `amount` in this correction's direction
    #[inline]
    pub fn shift(&self, value: f32, amount: f32) -> f32 {
        match self.direction {
            Direction::Increase => value + amount,
            Direction::Decrease => value - amount,
        }
    }

    /// Apply the correction: the entering variable moves by `theta`, the
    /// broken one by `delta`.
    pub fn apply(
        &self,
        bounds: &mut dyn Bounds,
        entering: usize,
        broken: usize,
        coeff: f32,
    ) -> Result<()> {
        let theta = self.theta(coeff);
        match self.direction {
            Direction::Increase => {
                bounds.increase_assignment(entering, theta)?;
                bounds.increase_assignment(broken, self.delta)
            }
            Direction::Decrease => {
                bounds.decrease_assignment(entering, theta)?;
                bounds.decrease_assignment(broken, self.delta)
            }
        }
    }
}
