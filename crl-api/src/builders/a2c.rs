use crate::builders::{models::MlpActorCritic, optimizer::OptimizerBuilder};
use candle_core::Device;
use crl_agents::a2c::{A2C, A2CConfig};
use crl_core::{
    Result,
    env::EnvironmentDescription,
    model::Parametric,
    plugin::StrategyPlugin,
    strategy::{RLBaseStrategy, StrategyConfig},
    timestep::Timestep,
};

pub struct A2CBuilder {
    pub hidden_layers: Vec<usize>,
    pub optimizer: OptimizerBuilder,
    pub config: A2CConfig,
    pub updates_per_step: usize,
}

impl Default for A2CBuilder {
    fn default() -> Self {
        A2CBuilder {
            hidden_layers: vec![64, 64],
            optimizer: OptimizerBuilder::default(),
            config: A2CConfig::default(),
            updates_per_step: 1,
        }
    }
}

impl A2CBuilder {
    pub fn build(
        &self,
        device: &Device,
        env_description: &EnvironmentDescription,
        per_experience_steps: impl Into<Timestep>,
        plugins: Vec<Box<dyn StrategyPlugin>>,
    ) -> Result<RLBaseStrategy<A2C<MlpActorCritic>>> {
        let model = MlpActorCritic::new(env_description, &self.hidden_layers, device)?;
        let optimizer = self.optimizer.build(model.vars()?)?;
        let a2c = A2C::new(model, self.config.clone())?;
        let config = StrategyConfig {
            updates_per_step: self.updates_per_step,
            ..StrategyConfig::new(per_experience_steps)
        };
        RLBaseStrategy::new(a2c, optimizer, config, plugins)
    }
}
