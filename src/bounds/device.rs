//! Device-resident bounds
//!
//! Values live in device buffers owned by the parallel backend's kernel
//! manager. Single values are read and written through blocking transfers;
//! predicate evaluation and in-place corrections happen inside kernels, so the
//! per-variable predicate calls are rejected here.

use super::{Bounds, Role};
use crate::error::{Error, Result};
use crate::runtime::kernels::{HAS_LOWER, HAS_UPPER, bound_mask};
use crate::runtime::{DeviceBuffer, KernelManager};

const DEVICE_RESIDENT: &str = "bounds are device resident; evaluated by kernels only";

/// Bounds, assignments and roles held in device buffers
pub struct DeviceBounds<K: KernelManager> {
    lower: DeviceBuffer<K>,
    upper: DeviceBuffer<K>,
    bounded: DeviceBuffer<K>,
    assigns: DeviceBuffer<K>,
    flags: DeviceBuffer<K>,
    num_vars: usize,
}

impl<K: KernelManager> DeviceBounds<K> {
    /// Allocate and initialise device bounds for `num_nonbasic` problem
    /// variables followed by `num_basic` slack variables.
    pub fn new(manager: &K, num_basic: usize, num_nonbasic: usize) -> Result<Self> {
        let num_vars = num_basic + num_nonbasic;
        let flags: Vec<u32> = (0..num_vars)
            .map(|v| {
                if v < num_nonbasic {
                    Role::Nonbasic.flag()
                } else {
                    Role::Basic.flag()
                }
            })
            .collect();

        Ok(Self {
            lower: DeviceBuffer::zeroed::<f32>(manager, num_vars)?,
            upper: DeviceBuffer::zeroed::<f32>(manager, num_vars)?,
            bounded: DeviceBuffer::from_slice(manager, &vec![HAS_LOWER; num_vars])?,
            assigns: DeviceBuffer::zeroed::<f32>(manager, num_vars)?,
            flags: DeviceBuffer::from_slice(manager, &flags)?,
            num_vars,
        })
    }

    /// Lower bound values (meaningful where the mask has `HAS_LOWER`)
    pub fn lower_buffer(&self) -> &DeviceBuffer<K> {
        &self.lower
    }

    /// Upper bound values (meaningful where the mask has `HAS_UPPER`)
    pub fn upper_buffer(&self) -> &DeviceBuffer<K> {
        &self.upper
    }

    /// Per-variable `HAS_LOWER | HAS_UPPER` mask
    pub fn bounded_buffer(&self) -> &DeviceBuffer<K> {
        &self.bounded
    }

    /// Assignments
    pub fn assignment_buffer(&self) -> &DeviceBuffer<K> {
        &self.assigns
    }

    /// Role flags
    pub fn flag_buffer(&self) -> &DeviceBuffer<K> {
        &self.flags
    }

    #[inline]
    fn check(&self, var: usize) -> Result<()> {
        Error::check_index(var, self.num_vars)
    }

    fn read_side(&self, var: usize, bit: u32, values: &DeviceBuffer<K>) -> Result<Option<f32>> {
        self.check(var)?;
        let mask: u32 = self.bounded.get(var)?;
        if mask & bit == 0 {
            return Ok(None);
        }
        Ok(Some(values.get::<f32>(var)?))
    }

    fn write_side(&self, var: usize, side: Side, value: Option<f32>) -> Result<()> {
        self.check(var)?;
        let mask: u32 = self.bounded.get(var)?;
        let (values, bit) = match side {
            Side::Lower => (&self.lower, HAS_LOWER),
            Side::Upper => (&self.upper, HAS_UPPER),
        };
        values.set(var, value.unwrap_or(0.0))?;
        let mask = if value.is_some() { mask | bit } else { mask & !bit };
        self.bounded.set(var, mask)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Lower,
    Upper,
}

impl<K: KernelManager> Bounds for DeviceBounds<K> {
    fn num_vars(&self) -> usize {
        self.num_vars
    }

    fn lower(&self, var: usize) -> Result<Option<f32>> {
        self.read_side(var, HAS_LOWER, &self.lower)
    }

    fn upper(&self, var: usize) -> Result<Option<f32>> {
        self.read_side(var, HAS_UPPER, &self.upper)
    }

    fn set_lower(&mut self, var: usize, lower: Option<f32>) -> Result<()> {
        self.write_side(var, Side::Lower, lower)
    }

    fn set_upper(&mut self, var: usize, upper: Option<f32>) -> Result<()> {
        self.write_side(var, Side::Upper, upper)
    }

    fn set_bounds(&mut self, var: usize, lower: Option<f32>, upper: Option<f32>) -> Result<()> {
        self.check(var)?;
        self.lower.set(var, lower.unwrap_or(0.0))?;
        self.upper.set(var, upper.unwrap_or(0.0))?;
        self.bounded.set(var, bound_mask(lower, upper))
    }

    fn assignment(&self, var: usize) -> Result<f32> {
        self.check(var)?;
        self.assigns.get(var)
    }

    fn set_assignment(&mut self, var: usize, value: f32) -> Result<()> {
        self.check(var)?;
        self.assigns.set(var, value)
    }

    fn assignments(&self, count: usize) -> Result<Vec<f32>> {
        if count > self.num_vars {
            return Err(Error::IndexOutOfBounds {
                index: count,
                size: self.num_vars,
            });
        }
        let mut out = vec![0.0f32; count];
        self.assigns.read(0, &mut out)?;
        Ok(out)
    }

    fn role(&self, var: usize) -> Result<Role> {
        self.check(var)?;
        Ok(Role::from_flag(self.flags.get(var)?))
    }

    fn set_role(&mut self, var: usize, role: Role) -> Result<()> {
        self.check(var)?;
        self.flags.set(var, role.flag())
    }

    fn is_broken(&self, _var: usize) -> Result<bool> {
        Err(Error::unsupported("is_broken", DEVICE_RESIDENT))
    }

    fn is_increasable(&self, _var: usize) -> Result<bool> {
        Err(Error::unsupported("is_increasable", DEVICE_RESIDENT))
    }

    fn is_decreasable(&self, _var: usize) -> Result<bool> {
        Err(Error::unsupported("is_decreasable", DEVICE_RESIDENT))
    }

    fn increase_assignment(&mut self, _var: usize, _delta: f32) -> Result<()> {
        Err(Error::unsupported("increase_assignment", DEVICE_RESIDENT))
    }

    fn decrease_assignment(&mut self, _var: usize, _delta: f32) -> Result<()> {
        Err(Error::unsupported("decrease_assignment", DEVICE_RESIDENT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HostDeviceConfig, HostKernelManager};

    fn device_bounds() -> DeviceBounds<HostKernelManager> {
        let manager = HostKernelManager::new(HostDeviceConfig::default());
        DeviceBounds::new(&manager, 2, 2).unwrap()
    }

    #[test]
    fn test_defaults_match_host() {
        let bounds = device_bounds();
        assert_eq!(bounds.num_vars(), 4);
        assert_eq!(bounds.lower(3).unwrap(), Some(0.0));
        assert_eq!(bounds.upper(3).unwrap(), None);
        assert_eq!(bounds.role(1).unwrap(), Role::Nonbasic);
        assert_eq!(bounds.role(2).unwrap(), Role::Basic);
    }

    #[test]
    fn test_set_and_clear_sides() {
        let mut bounds = device_bounds();
        bounds.set_bounds(2, None, Some(4.0)).unwrap();
        assert_eq!(bounds.lower(2).unwrap(), None);
        assert_eq!(bounds.upper(2).unwrap(), Some(4.0));
        bounds.set_lower(2, Some(-1.0)).unwrap();
        bounds.set_upper(2, None).unwrap();
        assert_eq!(bounds.lower(2).unwrap(), Some(-1.0));
        assert_eq!(bounds.upper(2).unwrap(), None);
        let mask: u32 = bounds.bounded_buffer().get(2).unwrap();
        assert_eq!(mask, HAS_LOWER);
    }

    #[test]
    fn test_assignments_and_roles() {
        let mut bounds = device_bounds();
        bounds.set_assignment(1, 3.5).unwrap();
        assert_eq!(bounds.assignment(1).unwrap(), 3.5);
        assert_eq!(bounds.assignments(2).unwrap(), vec![0.0, 3.5]);
        bounds.set_role(1, Role::Basic).unwrap();
        assert_eq!(bounds.role(1).unwrap(), Role::Basic);
        assert!(bounds.assignment(4).is_err());
    }

    #[test]
    fn test_predicates_unsupported() {
        let mut bounds = device_bounds();
        assert!(matches!(
            bounds.is_broken(2),
            Err(Error::Unsupported {
                operation: "is_broken",
                ..
            })
        ));
        assert!(bounds.is_increasable(0).is_err());
        assert!(bounds.is_decreasable(0).is_err());
        assert!(bounds.increase_assignment(0, 1.0).is_err());
        assert!(bounds.decrease_assignment(0, 1.0).is_err());
    }
}
