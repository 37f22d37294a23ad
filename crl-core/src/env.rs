use crate::{
    error::{CrlError, Result},
    rng::with_rng,
};
use candle_core::Tensor;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continuous { size: usize },
}

impl Space {
    pub fn continuous_from_dims(dims: &[usize]) -> Self {
        Self::Continuous {
            size: dims.iter().product(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Discrete(size) => *size,
            Self::Continuous { size } => *size,
        }
    }

    /// Draws a uniformly random action from a discrete space.
    pub fn sample(&self) -> Result<u32> {
        match self {
            Self::Discrete(0) => Err(CrlError::Env("cannot sample from an empty action space".into())),
            Self::Discrete(n) => Ok(with_rng(|rng| rng.random_range(0..*n as u32))),
            Self::Continuous { .. } => Err(CrlError::Env(
                "only discrete action spaces are supported".into(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

/// What the environment hands back after a single `step`.
#[derive(Debug, Clone)]
pub struct SnapShot {
    pub observation: Tensor,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: HashMap<String, f32>,
}

impl SnapShot {
    pub fn new(observation: Tensor, reward: f32, terminated: bool, truncated: bool) -> Self {
        Self {
            observation,
            reward,
            terminated,
            truncated,
            info: HashMap::new(),
        }
    }

    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

pub trait Env {
    fn reset(&mut self) -> Result<Tensor>;
    fn step(&mut self, action: u32) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn reset(&mut self) -> Result<Tensor> {
        (**self).reset()
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        (**self).step(action)
    }

    fn env_description(&self) -> EnvironmentDescription {
        (**self).env_description()
    }
}

/// One task of a continual learning stream.
pub struct Experience<E: Env> {
    pub environment: E,
    pub task_label: usize,
    pub current_experience: usize,
}

impl<E: Env> Experience<E> {
    pub fn new(environment: E, task_label: usize, current_experience: usize) -> Self {
        Self {
            environment,
            task_label,
            current_experience,
        }
    }

    /// Wraps each environment into an experience, labelling tasks by position.
    pub fn stream(envs: impl IntoIterator<Item = E>) -> Vec<Self> {
        envs.into_iter()
            .enumerate()
            .map(|(idx, env)| Self::new(env, idx, idx))
            .collect()
    }
}
