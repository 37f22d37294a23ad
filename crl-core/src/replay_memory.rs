use crate::{
    error::{CrlError, Result},
    rng::with_rng,
    rollout::{Rollout, Step, StepBatch},
};
use rand::seq::index;

/// Fixed capacity store of past steps with first-in first-overwritten replacement.
///
/// Rollouts are flattened on insertion, so steps coming from different actors are stored (and
/// sampled) as independent samples.
#[derive(Debug)]
pub struct ReplayMemory {
    memory: Vec<Step>,
    size: usize,
    steps_counter: usize,
}

impl ReplayMemory {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(CrlError::config("replay memory size must be positive"));
        }
        Ok(Self {
            memory: Vec::with_capacity(size),
            size,
            steps_counter: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Total number of steps ever added, overwritten ones included.
    pub fn steps_counter(&self) -> usize {
        self.steps_counter
    }

    pub fn steps(&self) -> &[Step] {
        &self.memory
    }

    pub fn add_rollouts(&mut self, rollouts: &[Rollout]) {
        for rollout in rollouts {
            let mut added = 0;
            for (offset, step) in rollout.flat_steps().enumerate() {
                let idx = self.steps_counter + offset;
                if idx < self.size {
                    self.memory.push(step.clone());
                } else {
                    self.memory[idx % self.size] = step.clone();
                }
                added += 1;
            }
            debug_assert_eq!(added, rollout.n_samples());
            self.steps_counter += added;
        }
    }

    fn sample_indices(&self, batch_dim: usize) -> Result<Vec<usize>> {
        if batch_dim > self.memory.len() {
            return Err(CrlError::InsufficientData {
                requested: batch_dim,
                available: self.memory.len(),
            });
        }
        Ok(with_rng(|rng| {
            index::sample(rng, self.memory.len(), batch_dim).into_vec()
        }))
    }

    /// Draws `batch_dim` distinct steps uniformly at random.
    pub fn sample_steps(&self, batch_dim: usize) -> Result<Vec<Step>> {
        Ok(self
            .sample_indices(batch_dim)?
            .into_iter()
            .map(|idx| self.memory[idx].clone())
            .collect())
    }

    pub fn sample_batch(&self, batch_dim: usize) -> Result<StepBatch> {
        StepBatch::from_steps(&self.sample_steps(batch_dim)?)
    }
}
