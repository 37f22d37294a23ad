pub mod epsilon;

use crate::{bootstrapped_returns, dqn::epsilon::EpsilonSchedule, validate_discount};
use candle_core::{D, Tensor};
use crl_core::{
    CrlError, Result,
    criterion::{Criterion, LossFn},
    env::{Env, Space},
    model::{QModel, polyak_update},
    replay_memory::ReplayMemory,
    rng::with_rng,
    rollout::{Rollout, StepBatch},
    strategy::{ActionSampler, RolloutMode, RolloutPlan, StrategyConfig, TrainingContext, UpdateRule},
    tensors::{QValues, TargetQValues},
    timestep::{Timestep, TimestepUnit},
};
use rand::Rng;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct DQNConfig {
    pub rollouts_per_step: usize,
    /// Only applies when training is measured in steps. Non-positive values disable the cap.
    pub max_steps_per_rollout: i64,
    pub replay_memory_size: usize,
    /// Steps collected into the replay memory before each experience starts training.
    pub replay_memory_init_size: usize,
    pub criterion: Criterion,
    pub batch_size: usize,
    pub initial_epsilon: f64,
    pub final_epsilon: f64,
    /// Share of the experience over which epsilon decays to its final value.
    pub exploration_fraction: f64,
    pub double_dqn: bool,
    /// Must use the same unit as the training duration.
    pub target_net_update_interval: Timestep,
    pub polyak_update_tau: f64,
    pub discount_factor: f64,
}

impl Default for DQNConfig {
    fn default() -> Self {
        Self {
            rollouts_per_step: 1,
            max_steps_per_rollout: 1,
            replay_memory_size: 10_000,
            replay_memory_init_size: 5_000,
            criterion: Criterion::smooth_l1(),
            batch_size: 32,
            initial_epsilon: 1.,
            final_epsilon: 0.05,
            exploration_fraction: 0.1,
            double_dqn: true,
            target_net_update_interval: Timestep::steps(10_000),
            polyak_update_tau: 0.01,
            discount_factor: 0.99,
        }
    }
}

impl DQNConfig {
    fn validate(&self) -> Result<()> {
        if self.rollouts_per_step == 0 {
            return Err(CrlError::config("rollouts_per_step must be positive"));
        }
        if self.batch_size == 0 {
            return Err(CrlError::config("batch_size must be positive"));
        }
        if self.batch_size > self.replay_memory_size {
            return Err(CrlError::config(format!(
                "batch_size {} does not fit in a replay memory of {} steps",
                self.batch_size, self.replay_memory_size
            )));
        }
        if self.target_net_update_interval.value == 0 {
            return Err(CrlError::config("target_net_update_interval must be positive"));
        }
        if !(self.polyak_update_tau > 0. && self.polyak_update_tau <= 1.) {
            return Err(CrlError::config(format!(
                "polyak_update_tau must lie in (0, 1], got {}",
                self.polyak_update_tau
            )));
        }
        validate_discount(self.discount_factor)?;
        EpsilonSchedule::new(
            self.initial_epsilon,
            self.final_epsilon,
            self.exploration_fraction,
            0,
        )?;
        Ok(())
    }
}

/// Deep Q-learning with a replay memory, a target network and epsilon-greedy exploration.
pub struct DQN<M: QModel> {
    pub model: M,
    pub target_net: M,
    /// Created on the first experience and kept across experiences.
    pub replay_memory: Option<ReplayMemory>,
    pub config: DQNConfig,
    schedule: Option<EpsilonSchedule>,
    epsilon: f64,
    unit: TimestepUnit,
}

impl<M: QModel> DQN<M> {
    pub fn new(model: M, config: DQNConfig) -> Result<Self> {
        config.validate()?;
        let target_net = model.duplicate()?;
        Ok(Self {
            model,
            target_net,
            replay_memory: None,
            epsilon: config.initial_epsilon,
            unit: config.target_net_update_interval.unit,
            config,
            schedule: None,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Values of the next observations used to build the regression targets. With double
    /// Q-learning the live network picks the action and the target network evaluates it.
    pub fn next_q_values(&self, next_observations: &Tensor) -> Result<TargetQValues> {
        let target_q = self.target_net.q_values(next_observations)?.detach();
        let next_q = if self.config.double_dqn {
            let greedy = self
                .model
                .q_values(next_observations)?
                .detach()
                .argmax(D::Minus1)?;
            target_q.gather(&greedy.unsqueeze(1)?, 1)?.squeeze(1)?
        } else {
            target_q.max(D::Minus1)?
        };
        Ok(TargetQValues(next_q))
    }

    fn batch_loss(&self, batch: &StepBatch) -> Result<Tensor> {
        let q_pred = QValues(
            self.model
                .q_values(&batch.observations)?
                .gather(&batch.actions.unsqueeze(1)?, 1)?
                .squeeze(1)?,
        );
        let next_q = self.next_q_values(&batch.next_observations)?;
        let target = bootstrapped_returns(
            &batch.rewards,
            &next_q,
            &batch.dones,
            self.config.discount_factor,
        )?;
        self.config.criterion.loss(&q_pred, &target)
    }

    fn replay_memory(&self) -> Result<&ReplayMemory> {
        self.replay_memory
            .as_ref()
            .ok_or(CrlError::InsufficientData {
                requested: self.config.batch_size,
                available: 0,
            })
    }

    fn update_target_net(&self, timestep: usize) -> Result<()> {
        let interval = self.config.target_net_update_interval.value;
        if timestep > 0 && timestep % interval == 0 {
            polyak_update(
                &self.target_net.named_vars()?,
                &self.model.named_vars()?,
                self.config.polyak_update_tau,
            )?;
            debug!(timestep, tau = self.config.polyak_update_tau, "target network updated");
        }
        Ok(())
    }
}

impl<M: QModel> ActionSampler for DQN<M> {
    /// Random action with probability epsilon, greedy action otherwise.
    fn sample_rollout_action(&mut self, observation: &Tensor, action_space: &Space) -> Result<u32> {
        let coin: f64 = with_rng(|rng| rng.random());
        if coin > self.epsilon {
            let q_values = self.model.q_values(&observation.unsqueeze(0)?)?.detach();
            Ok(q_values.argmax(D::Minus1)?.squeeze(0)?.to_scalar::<u32>()?)
        } else {
            action_space.sample()
        }
    }
}

impl<M: QModel> UpdateRule for DQN<M> {
    fn configure(&mut self, config: &StrategyConfig) -> Result<()> {
        config.per_experience_steps.ensure_same_unit(
            &self.config.target_net_update_interval,
            "target network update interval",
        )?;
        self.schedule = Some(EpsilonSchedule::new(
            self.config.initial_epsilon,
            self.config.final_epsilon,
            self.config.exploration_fraction,
            config.per_experience_steps.value,
        )?);
        self.unit = config.per_experience_steps.unit;
        Ok(())
    }

    fn rollout_plan(&self, _config: &StrategyConfig) -> RolloutPlan {
        let mode = match self.unit {
            TimestepUnit::Steps => RolloutMode::from_max_steps(self.config.max_steps_per_rollout),
            TimestepUnit::Episodes => RolloutMode::EpisodeBound,
        };
        RolloutPlan {
            n_rollouts: self.config.rollouts_per_step,
            mode,
        }
    }

    /// Resets exploration and fills the replay memory with `replay_memory_init_size` fresh steps.
    fn before_training_exp(&mut self, ctx: &mut TrainingContext, env: &mut dyn Env) -> Result<()> {
        self.epsilon = self.config.initial_epsilon;
        if self.replay_memory.is_none() {
            self.replay_memory = Some(ReplayMemory::new(self.config.replay_memory_size)?);
        }
        let mut collected = 0;
        while collected < self.config.replay_memory_init_size {
            let plan = RolloutPlan {
                n_rollouts: 1,
                mode: RolloutMode::StepBound {
                    max_steps: self.config.replay_memory_init_size - collected,
                },
            };
            let (rollouts, steps) = ctx.collect_rollouts(env, self, plan)?;
            if let Some(memory) = self.replay_memory.as_mut() {
                memory.add_rollouts(&rollouts);
            }
            collected += steps;
        }
        // each training iteration must start a fresh episode
        if self.unit == TimestepUnit::Episodes {
            ctx.abandon_episode();
        }
        info!(
            steps = collected,
            memory = self.replay_memory.as_ref().map_or(0, ReplayMemory::len),
            "replay memory warmed up"
        );
        Ok(())
    }

    fn before_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        if let Some(schedule) = self.schedule {
            self.epsilon = schedule.value(ctx.timestep);
        }
        trace!(timestep = ctx.timestep, epsilon = self.epsilon);
        self.update_target_net(ctx.timestep)
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        match self.replay_memory.as_mut() {
            Some(memory) => {
                memory.add_rollouts(&ctx.rollouts);
                Ok(())
            }
            None => Err(CrlError::config(
                "replay memory is created when an experience starts",
            )),
        }
    }

    /// Mean loss over `n_update_steps` batches sampled from the replay memory. The rollouts are
    /// already in the memory and are not used directly.
    fn update(&mut self, _rollouts: &[Rollout], n_update_steps: usize) -> Result<Tensor> {
        if n_update_steps == 0 {
            return Err(CrlError::config("n_update_steps must be positive"));
        }
        let mut total: Option<Tensor> = None;
        for _ in 0..n_update_steps {
            let batch = self.replay_memory()?.sample_batch(self.config.batch_size)?;
            let loss = self.batch_loss(&batch)?;
            total = Some(match total {
                Some(total) => total.add(&loss)?,
                None => loss,
            });
        }
        match total {
            Some(total) => Ok(total.affine(1. / n_update_steps as f64, 0.)?),
            None => Err(CrlError::config("n_update_steps must be positive")),
        }
    }
}
