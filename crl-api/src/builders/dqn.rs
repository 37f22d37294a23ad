use crate::builders::{models::MlpQNetwork, optimizer::OptimizerBuilder};
use candle_core::Device;
use crl_agents::dqn::{DQN, DQNConfig};
use crl_core::{
    Result,
    env::EnvironmentDescription,
    model::Parametric,
    plugin::StrategyPlugin,
    strategy::{RLBaseStrategy, StrategyConfig},
    timestep::Timestep,
};

pub struct DQNBuilder {
    pub hidden_layers: Vec<usize>,
    pub optimizer: OptimizerBuilder,
    pub config: DQNConfig,
    pub updates_per_step: usize,
}

impl Default for DQNBuilder {
    fn default() -> Self {
        DQNBuilder {
            hidden_layers: vec![64, 64],
            optimizer: OptimizerBuilder {
                learning_rate: 1e-4,
                ..Default::default()
            },
            config: DQNConfig::default(),
            updates_per_step: 1,
        }
    }
}

impl DQNBuilder {
    /// Only the live network is handed to the optimizer; the target network follows it through
    /// polyak updates.
    pub fn build(
        &self,
        device: &Device,
        env_description: &EnvironmentDescription,
        per_experience_steps: impl Into<Timestep>,
        plugins: Vec<Box<dyn StrategyPlugin>>,
    ) -> Result<RLBaseStrategy<DQN<MlpQNetwork>>> {
        let model = MlpQNetwork::new(env_description, &self.hidden_layers, device)?;
        let optimizer = self.optimizer.build(model.vars()?)?;
        let dqn = DQN::new(model, self.config.clone())?;
        let config = StrategyConfig {
            updates_per_step: self.updates_per_step,
            ..StrategyConfig::new(per_experience_steps)
        };
        RLBaseStrategy::new(dqn, optimizer, config, plugins)
    }
}
