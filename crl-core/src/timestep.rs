use crate::error::{CrlError, Result};
use derive_more::Display;

/// Unit in which training durations and intervals are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum TimestepUnit {
    #[default]
    #[display("steps")]
    Steps,
    #[display("episodes")]
    Episodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("{value} {unit}")]
pub struct Timestep {
    pub value: usize,
    pub unit: TimestepUnit,
}

impl Timestep {
    pub fn steps(value: usize) -> Self {
        Self {
            value,
            unit: TimestepUnit::Steps,
        }
    }

    pub fn episodes(value: usize) -> Self {
        Self {
            value,
            unit: TimestepUnit::Episodes,
        }
    }

    /// Fails with a configuration error unless both quantities share a unit.
    pub fn ensure_same_unit(&self, other: &Timestep, what: &str) -> Result<()> {
        if self.unit != other.unit {
            return Err(CrlError::config(format!(
                "{what} is expressed in {}, but the training duration is expressed in {}",
                other.unit, self.unit
            )));
        }
        Ok(())
    }
}

// a bare integer is a number of steps
impl From<usize> for Timestep {
    fn from(value: usize) -> Self {
        Self::steps(value)
    }
}
