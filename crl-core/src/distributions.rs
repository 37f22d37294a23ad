use crate::{
    error::{CrlError, Result},
    rng::with_rng,
};
use candle_core::{D, Tensor};
use candle_nn::ops::{log_softmax, softmax};
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

/// Categorical distribution over the last dimension of a batch of logits.
#[derive(Debug, Clone)]
pub struct Categorical {
    logits: Tensor,
}

impl Categorical {
    pub fn from_logits(logits: Tensor) -> Self {
        Self { logits }
    }

    /// One action per row of the logits.
    pub fn sample(&self) -> Result<Vec<u32>> {
        let probs: Vec<Vec<f32>> = softmax(&self.logits.detach(), D::Minus1)?.to_vec2()?;
        probs
            .iter()
            .map(|row| {
                let distribution = WeightedIndex::new(row)
                    .map_err(|err| CrlError::Candle(candle_core::Error::wrap(err)))?;
                Ok(with_rng(|rng| distribution.sample(rng)) as u32)
            })
            .collect()
    }

    /// Log-probability of `actions` (`u32`, shape `(batch,)`), differentiable through the logits.
    pub fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let log_probs = log_softmax(&self.logits, D::Minus1)?;
        Ok(log_probs.gather(&actions.unsqueeze(1)?, 1)?.squeeze(1)?)
    }
}
