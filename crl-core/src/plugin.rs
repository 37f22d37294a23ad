use crate::{error::Result, strategy::TrainingContext};

/// Callbacks around every phase of the training loop.
///
/// Every method defaults to a no-op. Plugins run in registration order, after the update
/// rule's own hook for the same phase, and any error they return aborts training.
#[allow(unused_variables)]
pub trait StrategyPlugin {
    fn before_training(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn before_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn before_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_rollout(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn before_forward(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_forward(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn before_backward(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_backward(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_training_exp(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }

    fn after_training(&mut self, ctx: &TrainingContext) -> Result<()> {
        Ok(())
    }
}
