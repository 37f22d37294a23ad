pub mod a2c;
pub mod dqn;

use crate::{a2c::A2C, dqn::DQN};
use candle_core::Tensor;
use crl_core::{
    Result,
    env::{Env, Space},
    model::{ActorCriticModel, QModel},
    rollout::Rollout,
    strategy::{ActionSampler, RolloutPlan, StrategyConfig, TrainingContext, UpdateRule},
};

/// `rewards + discount * next_values`, with `next_values` zeroed wherever `dones` is set.
///
/// The mask selects instead of multiplying, so terminal positions contribute exactly zero even
/// when the raw next value is not finite.
pub fn bootstrapped_returns(
    rewards: &Tensor,
    next_values: &Tensor,
    dones: &Tensor,
    discount: f64,
) -> Result<Tensor> {
    let masked = dones.where_cond(&next_values.zeros_like()?, next_values)?;
    Ok(rewards.add(&masked.affine(discount, 0.)?)?)
}

pub fn validate_discount(discount: f64) -> Result<()> {
    if !(0. ..1.).contains(&discount) {
        return Err(crl_core::CrlError::config(format!(
            "discount factor must lie in [0, 1), got {discount}"
        )));
    }
    Ok(())
}

/// The update rules a strategy can be built with when the choice is made at runtime.
pub enum UpdateRuleKind<AC: ActorCriticModel, Q: QModel> {
    A2C(A2C<AC>),
    DQN(DQN<Q>),
}

impl<AC: ActorCriticModel, Q: QModel> ActionSampler for UpdateRuleKind<AC, Q> {
    fn sample_rollout_action(&mut self, observation: &Tensor, action_space: &Space) -> Result<u32> {
        match self {
            Self::A2C(a2c) => a2c.sample_rollout_action(observation, action_space),
            Self::DQN(dqn) => dqn.sample_rollout_action(observation, action_space),
        }
    }
}

impl<AC: ActorCriticModel, Q: QModel> UpdateRule for UpdateRuleKind<AC, Q> {
    fn configure(&mut self, config: &StrategyConfig) -> Result<()> {
        match self {
            Self::A2C(a2c) => a2c.configure(config),
            Self::DQN(dqn) => dqn.configure(config),
        }
    }

    fn rollout_plan(&self, config: &StrategyConfig) -> RolloutPlan {
        match self {
            Self::A2C(a2c) => a2c.rollout_plan(config),
            Self::DQN(dqn) => dqn.rollout_plan(config),
        }
    }

    fn before_training_exp(&mut self, ctx: &mut TrainingContext, env: &mut dyn Env) -> Result<()> {
        match self {
            Self::A2C(a2c) => a2c.before_training_exp(ctx, env),
            Self::DQN(dqn) => dqn.before_training_exp(ctx, env),
        }
    }

    fn before_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        match self {
            Self::A2C(a2c) => a2c.before_rollout(ctx),
            Self::DQN(dqn) => dqn.before_rollout(ctx),
        }
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        match self {
            Self::A2C(a2c) => a2c.after_rollout(ctx),
            Self::DQN(dqn) => dqn.after_rollout(ctx),
        }
    }

    fn update(&mut self, rollouts: &[Rollout], n_update_steps: usize) -> Result<Tensor> {
        match self {
            Self::A2C(a2c) => a2c.update(rollouts, n_update_steps),
            Self::DQN(dqn) => dqn.update(rollouts, n_update_steps),
        }
    }
}
