use crl_core::{Result, plugin::StrategyPlugin, strategy::TrainingContext};
use tracing::info;

/// Reports the rewards collected by every rollout and a summary per experience.
#[derive(Debug, Default)]
pub struct LoggerPlugin {
    rollout_idx: usize,
    experience_reward: f32,
    experience_episodes: usize,
}

impl StrategyPlugin for LoggerPlugin {
    fn before_training_exp(&mut self, _ctx: &TrainingContext) -> Result<()> {
        self.experience_reward = 0.;
        self.experience_episodes = 0;
        Ok(())
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        let total_reward: f32 = ctx.rollouts.iter().map(|r| r.total_reward()).sum();
        let episodes = ctx.episode_returns.len();
        self.experience_reward += total_reward;
        self.experience_episodes += episodes;
        if episodes > 0 {
            let avg_return = ctx.episode_returns.iter().sum::<f32>() / episodes as f32;
            info!(
                rollout = self.rollout_idx,
                episodes,
                total_reward,
                avg_return,
                "rollout finished"
            );
        }
        self.rollout_idx += 1;
        Ok(())
    }

    fn after_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        info!(
            experience = ctx.current_experience,
            episodes = self.experience_episodes,
            total_reward = self.experience_reward,
            total_steps = ctx.total_steps,
            "experience finished"
        );
        Ok(())
    }
}
