use crate::error::{CrlError, Result};
use candle_core::{Device, Tensor};

/// A single environment transition.
///
/// Only one actor contributes to a step at the moment, see [`Step::n_envs`]. The observation
/// tensors are detached on construction so no computation graph is ever kept alive by the
/// rollout or replay storage.
#[derive(Debug, Clone)]
pub struct Step {
    pub states: Tensor,
    pub actions: u32,
    pub done: bool,
    pub rewards: f32,
    pub next_states: Tensor,
}

impl Step {
    pub fn new(states: &Tensor, actions: u32, done: bool, rewards: f32, next_states: &Tensor) -> Self {
        Self {
            states: states.detach(),
            actions,
            done,
            rewards,
            next_states: next_states.detach(),
        }
    }

    // TODO: vectorized environments would report states.dims()[0] here, the flattening in
    // `ReplayMemory::add_rollouts` and the actor dimension of `Rollout` already expect it
    pub fn n_envs(&self) -> usize {
        1
    }
}

/// Steps stacked along a leading batch dimension.
#[derive(Debug)]
pub struct StepBatch {
    pub observations: Tensor,
    pub next_observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub dones: Tensor,
}

impl StepBatch {
    pub fn from_steps(steps: &[Step]) -> Result<Self> {
        let Some(first) = steps.first() else {
            return Err(CrlError::InsufficientData {
                requested: 1,
                available: 0,
            });
        };
        let device = first.states.device();
        let states = steps.iter().map(|s| &s.states).collect::<Vec<_>>();
        let next_states = steps.iter().map(|s| &s.next_states).collect::<Vec<_>>();
        let actions = steps.iter().map(|s| s.actions).collect::<Vec<_>>();
        let rewards = steps.iter().map(|s| s.rewards).collect::<Vec<_>>();
        let dones = steps.iter().map(|s| s.done as u8).collect::<Vec<_>>();
        let batch_size = steps.len();
        Ok(Self {
            observations: Tensor::stack(&states, 0)?,
            next_observations: Tensor::stack(&next_states, 0)?,
            actions: Tensor::from_vec(actions, batch_size, device)?,
            rewards: Tensor::from_vec(rewards, batch_size, device)?,
            dones: Tensor::from_vec(dones, batch_size, device)?,
        })
    }

    pub fn len(&self) -> usize {
        self.rewards.dims1().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Steps gathered contiguously by one collection burst.
///
/// The derived views put the actor dimension first and time second, so `rewards()` has shape
/// `(n_envs, t)` and `observations()` has shape `(n_envs, t, *observation_shape)`.
#[derive(Debug, Clone, Default)]
pub struct Rollout {
    pub steps: Vec<Step>,
}

impl Rollout {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn n_envs(&self) -> usize {
        self.steps.first().map_or(1, Step::n_envs)
    }

    /// Number of samples this rollout yields once actors and time are merged.
    pub fn n_samples(&self) -> usize {
        self.n_envs() * self.len()
    }

    /// Steps in flat `actor x time` order.
    pub fn flat_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn total_reward(&self) -> f32 {
        self.steps.iter().map(|s| s.rewards).sum()
    }

    fn device(&self) -> Result<Device> {
        self.steps
            .first()
            .map(|s| s.states.device().clone())
            .ok_or(CrlError::InsufficientData {
                requested: 1,
                available: 0,
            })
    }

    pub fn rewards(&self) -> Result<Tensor> {
        let rewards = self.steps.iter().map(|s| s.rewards).collect::<Vec<_>>();
        Ok(Tensor::from_vec(rewards, (self.n_envs(), self.len()), &self.device()?)?)
    }

    pub fn dones(&self) -> Result<Tensor> {
        let dones = self.steps.iter().map(|s| s.done as u8).collect::<Vec<_>>();
        Ok(Tensor::from_vec(dones, (self.n_envs(), self.len()), &self.device()?)?)
    }

    pub fn actions(&self) -> Result<Tensor> {
        let actions = self.steps.iter().map(|s| s.actions).collect::<Vec<_>>();
        Ok(Tensor::from_vec(actions, (self.n_envs(), self.len()), &self.device()?)?)
    }

    pub fn observations(&self) -> Result<Tensor> {
        let states = self.steps.iter().map(|s| &s.states).collect::<Vec<_>>();
        Ok(Tensor::stack(&states, 0)?.unsqueeze(0)?)
    }

    pub fn next_observations(&self) -> Result<Tensor> {
        let next_states = self.steps.iter().map(|s| &s.next_states).collect::<Vec<_>>();
        Ok(Tensor::stack(&next_states, 0)?.unsqueeze(0)?)
    }

    /// Merges actor and time into one batch dimension.
    pub fn to_batch(&self) -> Result<StepBatch> {
        let steps = self.flat_steps().cloned().collect::<Vec<_>>();
        StepBatch::from_steps(&steps)
    }
}

#[cfg(test)]
mod test {
    use super::{Rollout, Step};
    use candle_core::{Device, Tensor};

    fn rollout(len: usize) -> candle_core::Result<Rollout> {
        let steps = (0..len)
            .map(|i| {
                let state = Tensor::full(i as f32, 3, &Device::Cpu)?;
                let next_state = Tensor::full(i as f32 + 1., 3, &Device::Cpu)?;
                Ok(Step::new(&state, (i % 2) as u32, i == len - 1, i as f32, &next_state))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Rollout::new(steps))
    }

    #[test]
    fn views_are_actor_major() -> crate::error::Result<()> {
        let rollout = rollout(4)?;
        assert_eq!(rollout.rewards()?.dims(), &[1, 4]);
        assert_eq!(rollout.dones()?.dims(), &[1, 4]);
        assert_eq!(rollout.actions()?.dims(), &[1, 4]);
        assert_eq!(rollout.observations()?.dims(), &[1, 4, 3]);
        assert_eq!(rollout.next_observations()?.dims(), &[1, 4, 3]);
        assert_eq!(rollout.rewards()?.to_vec2::<f32>()?, vec![vec![0., 1., 2., 3.]]);
        assert_eq!(rollout.dones()?.to_vec2::<u8>()?, vec![vec![0, 0, 0, 1]]);
        assert_eq!(rollout.n_samples(), 4);
        Ok(())
    }

    #[test]
    fn batch_merges_actor_and_time() -> crate::error::Result<()> {
        let batch = rollout(5)?.to_batch()?;
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.observations.dims(), &[5, 3]);
        assert_eq!(batch.actions.to_vec1::<u32>()?, vec![0, 1, 0, 1, 0]);
        Ok(())
    }

    #[test]
    fn steps_are_detached() -> candle_core::Result<()> {
        let var = candle_core::Var::new(&[1f32, 2.], &Device::Cpu)?;
        let step = Step::new(var.as_tensor(), 0, false, 0., var.as_tensor());
        assert!(!step.states.is_variable());
        assert!(!step.next_states.is_variable());
        Ok(())
    }
}
