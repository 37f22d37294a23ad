use crate::{bootstrapped_returns, validate_discount};
use candle_core::{DType, Device, Tensor};
use crl_core::{
    CrlError, Result,
    criterion::{Criterion, LossFn},
    distributions::Categorical,
    env::Space,
    model::ActorCriticModel,
    rollout::Rollout,
    strategy::{ActionSampler, RolloutMode, RolloutPlan, StrategyConfig, UpdateRule},
    tensors::{Advantages, Logp, PolicyLoss, Returns, ValueLoss, ValuesPred},
    timestep::TimestepUnit,
};
use tracing::{Level, debug};

#[derive(Debug, Clone)]
pub struct A2CConfig {
    pub discount_factor: f64,
    /// Non-positive values let rollouts run until their episode ends.
    pub max_steps_per_rollout: i64,
    pub policy_loss_weight: f64,
    pub value_loss_weight: f64,
    pub value_criterion: Criterion,
}

impl Default for A2CConfig {
    fn default() -> Self {
        Self {
            discount_factor: 0.99,
            max_steps_per_rollout: 5,
            policy_loss_weight: 0.5,
            value_loss_weight: 0.5,
            value_criterion: Criterion::mse(),
        }
    }
}

/// Advantage actor-critic with one-step bootstrapped returns.
pub struct A2C<M: ActorCriticModel> {
    pub model: M,
    pub config: A2CConfig,
}

impl<M: ActorCriticModel> A2C<M> {
    pub fn new(model: M, config: A2CConfig) -> Result<Self> {
        validate_discount(config.discount_factor)?;
        Ok(Self { model, config })
    }

    // Policy and value losses of a single non-empty rollout.
    fn rollout_losses(&self, rollout: &Rollout) -> Result<(PolicyLoss, ValueLoss)> {
        let batch = rollout.to_batch()?;
        let output = self.model.forward(&batch.observations, true, true)?;
        let logits = output
            .policy_logits
            .ok_or_else(|| CrlError::config("actor-critic model produced no policy logits"))?;
        let values = ValuesPred(
            output
                .values
                .ok_or_else(|| CrlError::config("actor-critic model produced no values"))?,
        );
        let logp = Logp(Categorical::from_logits(logits).log_prob(&batch.actions)?);
        let next_values = self
            .model
            .forward(&batch.next_observations, true, false)?
            .values()?
            .detach();
        let returns = Returns(bootstrapped_returns(
            &batch.rewards,
            &next_values,
            &batch.dones,
            self.config.discount_factor,
        )?);
        let advantages = Advantages(returns.sub(&values)?.detach());
        let policy_loss = PolicyLoss(advantages.mul(&logp)?.mean_all()?.neg()?);
        let value_loss = ValueLoss(self.config.value_criterion.loss(&values, &returns)?);
        Ok((policy_loss, value_loss))
    }
}

impl<M: ActorCriticModel> ActionSampler for A2C<M> {
    fn sample_rollout_action(&mut self, observation: &Tensor, _action_space: &Space) -> Result<u32> {
        let logits = self
            .model
            .forward(&observation.unsqueeze(0)?, false, true)?
            .policy_logits()?
            .detach();
        Categorical::from_logits(logits)
            .sample()?
            .first()
            .copied()
            .ok_or_else(|| CrlError::config("policy produced no action"))
    }
}

impl<M: ActorCriticModel> UpdateRule for A2C<M> {
    fn configure(&mut self, config: &StrategyConfig) -> Result<()> {
        if config.per_experience_steps.unit != TimestepUnit::Steps {
            return Err(CrlError::config(format!(
                "A2C trains for a number of steps, got a duration in {}",
                config.per_experience_steps.unit
            )));
        }
        validate_discount(self.config.discount_factor)
    }

    fn rollout_plan(&self, _config: &StrategyConfig) -> RolloutPlan {
        RolloutPlan {
            n_rollouts: 1,
            mode: RolloutMode::from_max_steps(self.config.max_steps_per_rollout),
        }
    }

    /// Sums the weighted losses of every non-empty rollout. The same rollouts are reused for each
    /// of the `n_update_steps` passes, so the count does not change the result.
    fn update(&mut self, rollouts: &[Rollout], _n_update_steps: usize) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for rollout in rollouts.iter().filter(|rollout| !rollout.is_empty()) {
            let (policy_loss, value_loss) = self.rollout_losses(rollout)?;
            let loss = policy_loss
                .affine(self.config.policy_loss_weight, 0.)?
                .add(&value_loss.affine(self.config.value_loss_weight, 0.)?)?;
            total = Some(match total {
                Some(total) => total.add(&loss)?,
                None => loss,
            });
        }
        match total {
            Some(total) => {
                if tracing::enabled!(Level::DEBUG) {
                    debug!(n_rollouts = rollouts.len(), loss = total.to_scalar::<f32>()?, "a2c update");
                }
                Ok(total)
            }
            None => Ok(Tensor::zeros((), DType::F32, &self.device()?)?),
        }
    }
}

impl<M: ActorCriticModel> A2C<M> {
    fn device(&self) -> Result<Device> {
        Ok(self
            .model
            .vars()?
            .first()
            .map(|var| var.device().clone())
            .unwrap_or(Device::Cpu))
    }
}
