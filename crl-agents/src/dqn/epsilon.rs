use crl_core::{CrlError, Result};

/// Linear decay from `initial` to `floor` over the first `exploration_fraction` of an
/// experience, constant afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    initial: f64,
    floor: f64,
    decay_timesteps: f64,
}

impl EpsilonSchedule {
    pub fn new(initial: f64, floor: f64, exploration_fraction: f64, duration: usize) -> Result<Self> {
        if !(0. ..=1.).contains(&initial) || !(0. ..=1.).contains(&floor) {
            return Err(CrlError::config(format!(
                "exploration rates must lie in [0, 1], got {initial} and {floor}"
            )));
        }
        if floor > initial {
            return Err(CrlError::config(format!(
                "final exploration rate {floor} exceeds the initial one {initial}"
            )));
        }
        if !(0. ..=1.).contains(&exploration_fraction) {
            return Err(CrlError::config(format!(
                "exploration fraction must lie in [0, 1], got {exploration_fraction}"
            )));
        }
        Ok(Self {
            initial,
            floor,
            decay_timesteps: exploration_fraction * duration as f64,
        })
    }

    pub fn value(&self, timestep: usize) -> f64 {
        let progress = timestep as f64 / self.decay_timesteps;
        // a zero decay window gives NaN or infinite progress
        if progress.is_nan() || progress >= 1. {
            return self.floor;
        }
        (self.initial + progress * (self.floor - self.initial)).max(self.floor)
    }
}
