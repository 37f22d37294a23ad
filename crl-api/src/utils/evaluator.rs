use candle_core::{D, Tensor};
use crl_core::{
    Result,
    env::{Env, Space},
    model::{ActorCriticModel, QModel},
    strategy::ActionSampler,
};
use tracing::info;

/// Plays the action with the highest value under a Q network.
pub struct GreedyQ<'a, M: QModel>(pub &'a M);

impl<M: QModel> ActionSampler for GreedyQ<'_, M> {
    fn sample_rollout_action(&mut self, observation: &Tensor, _action_space: &Space) -> Result<u32> {
        let q_values = self.0.q_values(&observation.unsqueeze(0)?)?;
        Ok(q_values.argmax(D::Minus1)?.squeeze(0)?.to_scalar::<u32>()?)
    }
}

/// Plays the most likely action of an actor-critic policy.
pub struct GreedyPolicy<'a, M: ActorCriticModel>(pub &'a M);

impl<M: ActorCriticModel> ActionSampler for GreedyPolicy<'_, M> {
    fn sample_rollout_action(&mut self, observation: &Tensor, _action_space: &Space) -> Result<u32> {
        let logits = self
            .0
            .forward(&observation.unsqueeze(0)?, false, true)?
            .policy_logits()?;
        Ok(logits.argmax(D::Minus1)?.squeeze(0)?.to_scalar::<u32>()?)
    }
}

pub struct Evaluator<E: Env> {
    pub env: E,
    pub eval_episodes: usize,
    /// Episodes longer than this are cut short. `None` waits for the environment to finish.
    pub max_episode_steps: Option<usize>,
    pub evaluations_results: Vec<Vec<f32>>,
}

impl<E: Env> Evaluator<E> {
    pub fn new(env: E, eval_episodes: usize) -> Self {
        Self {
            env,
            eval_episodes,
            max_episode_steps: None,
            evaluations_results: vec![],
        }
    }

    /// Runs `eval_episodes` episodes with `sampler` and returns the return of each.
    pub fn evaluate(&mut self, sampler: &mut dyn ActionSampler) -> Result<Vec<f32>> {
        let action_space = self.env.env_description().action_space;
        let mut returns = Vec::with_capacity(self.eval_episodes);
        for _ in 0..self.eval_episodes {
            let mut observation = self.env.reset()?;
            let mut episode_return = 0.;
            let mut steps = 0;
            loop {
                let action = sampler.sample_rollout_action(&observation, &action_space)?;
                let snapshot = self.env.step(action)?;
                episode_return += snapshot.reward;
                steps += 1;
                if snapshot.done() || self.max_episode_steps.is_some_and(|max| steps >= max) {
                    break;
                }
                observation = snapshot.observation;
            }
            returns.push(episode_return);
        }
        if !returns.is_empty() {
            let avg_return = returns.iter().sum::<f32>() / returns.len() as f32;
            info!(episodes = returns.len(), avg_return, "evaluation finished");
        }
        self.evaluations_results.push(returns.clone());
        Ok(returns)
    }
}
