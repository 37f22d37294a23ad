use candle_core::{Device, Tensor};
use crl_core::{
    Result,
    env::{Env, EnvironmentDescription, SnapShot, Space},
};

/// Alternates between two one-hot encoded states. Playing the index of the current state earns
/// a reward of 1, anything else earns 0, unless `fixed_reward` pays 1 for every step. Episodes
/// end after `episode_len` steps.
#[derive(Debug, Clone)]
pub struct TwoStateEnv {
    pub episode_len: usize,
    pub fixed_reward: bool,
    pub state: usize,
    pub t: usize,
    pub resets: usize,
}

impl TwoStateEnv {
    pub fn new(episode_len: usize) -> Self {
        Self {
            episode_len,
            fixed_reward: false,
            state: 0,
            t: 0,
            resets: 0,
        }
    }

    pub fn with_fixed_reward(episode_len: usize) -> Self {
        Self {
            fixed_reward: true,
            ..Self::new(episode_len)
        }
    }

    fn observation(&self) -> Result<Tensor> {
        let mut data = [0f32; 2];
        data[self.state] = 1.;
        Ok(Tensor::new(&data, &Device::Cpu)?)
    }
}

impl Env for TwoStateEnv {
    fn reset(&mut self) -> Result<Tensor> {
        self.state = 0;
        self.t = 0;
        self.resets += 1;
        self.observation()
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        let reward = if self.fixed_reward || action as usize == self.state { 1. } else { 0. };
        self.state = 1 - self.state;
        self.t += 1;
        let truncated = self.t >= self.episode_len;
        Ok(SnapShot::new(self.observation()?, reward, false, truncated))
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::Continuous { size: 2 }, Space::Discrete(2))
    }
}
