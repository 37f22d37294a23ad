#![allow(dead_code)]

use candle_core::{Device, Tensor, Var};
use crl_core::{
    Result,
    env::{Env, EnvironmentDescription, SnapShot, Space},
    model::{ActorCriticModel, ModelOutput, Parametric, QModel},
    rollout::{Rollout, Step},
};

pub fn one_hot(state: usize, n_states: usize) -> Result<Tensor> {
    let mut data = vec![0f32; n_states];
    data[state] = 1.;
    Ok(Tensor::new(data, &Device::Cpu)?)
}

pub fn step(state: usize, action: u32, done: bool, reward: f32, next_state: usize, n_states: usize) -> Result<Step> {
    Ok(Step::new(
        &one_hot(state, n_states)?,
        action,
        done,
        reward,
        &one_hot(next_state, n_states)?,
    ))
}

pub fn table(rows: &[[f32; 2]]) -> Result<Var> {
    let flat = Tensor::new(rows.concat(), &Device::Cpu)?.reshape((rows.len(), 2))?;
    Ok(Var::from_tensor(&flat)?)
}

pub fn single_step_rollout(step: Step) -> Rollout {
    Rollout::new(vec![step])
}

/// Walks right along `len` one-hot encoded cells, rewarding action 0, until the last cell.
pub struct LineEnv {
    pub len: usize,
    pub pos: usize,
}

impl LineEnv {
    pub fn new(len: usize) -> Self {
        Self { len, pos: 0 }
    }
}

impl Env for LineEnv {
    fn reset(&mut self) -> Result<Tensor> {
        self.pos = 0;
        one_hot(self.pos, self.len)
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        self.pos += 1;
        let reward = if action == 0 { 1. } else { 0. };
        let terminated = self.pos + 1 >= self.len;
        Ok(SnapShot::new(one_hot(self.pos, self.len)?, reward, terminated, false))
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::Continuous { size: self.len }, Space::Discrete(2))
    }
}

/// Tabular Q function over one-hot observations.
pub struct TableQ {
    pub table: Var,
}

impl TableQ {
    pub fn new(rows: &[[f32; 2]]) -> Result<Self> {
        Ok(Self {
            table: table(rows)?,
        })
    }

    pub fn rows(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.table.as_tensor().to_vec2()?)
    }
}

impl Parametric for TableQ {
    fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        Ok(vec![("table".to_string(), self.table.clone())])
    }
}

impl QModel for TableQ {
    fn q_values(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(observations.matmul(self.table.as_tensor())?)
    }

    fn duplicate(&self) -> Result<Self> {
        Ok(Self {
            table: Var::from_tensor(&self.table.as_tensor().copy()?)?,
        })
    }
}

/// Tabular policy logits and state values over one-hot observations.
pub struct TableActorCritic {
    pub logits: Var,
    pub values: Var,
}

impl TableActorCritic {
    pub fn new(logits: &[[f32; 2]], values: &[f32]) -> Result<Self> {
        Ok(Self {
            logits: table(logits)?,
            values: Var::new(values.to_vec(), &Device::Cpu)?,
        })
    }
}

impl Parametric for TableActorCritic {
    fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        Ok(vec![
            ("logits".to_string(), self.logits.clone()),
            ("values".to_string(), self.values.clone()),
        ])
    }
}

impl ActorCriticModel for TableActorCritic {
    fn forward(&self, observations: &Tensor, compute_value: bool, compute_policy: bool) -> Result<ModelOutput> {
        let values = if compute_value {
            Some(
                observations
                    .matmul(&self.values.as_tensor().unsqueeze(1)?)?
                    .squeeze(1)?,
            )
        } else {
            None
        };
        let policy_logits = if compute_policy {
            Some(observations.matmul(self.logits.as_tensor())?)
        } else {
            None
        };
        Ok(ModelOutput {
            values,
            policy_logits,
        })
    }
}
